/// Playlist-level metadata read from the lines before the first channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Whether the `#EXTM3U` marker is present.
    pub has_marker: bool,
    pub epg_sources: Vec<String>,
    /// `key="value"` attributes on the marker line other than EPG sources.
    pub attributes: Vec<(String, String)>,
    /// Display name from `#PLAYLIST:`.
    pub name: Option<String>,
    /// Header directives the codec does not interpret, kept verbatim.
    pub extra_lines: Vec<String>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            has_marker: true,
            epg_sources: Vec::new(),
            attributes: Vec::new(),
            name: None,
            extra_lines: Vec::new(),
        }
    }
}

impl Header {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Add an EPG source unless it is already listed.
    pub fn add_epg_source(&mut self, url: impl Into<String>) {
        let url = url.into().trim().to_string();
        if !url.is_empty() && !self.epg_sources.contains(&url) {
            self.epg_sources.push(url);
        }
    }

    pub(crate) fn needs_marker(&self) -> bool {
        self.has_marker || !self.epg_sources.is_empty() || !self.attributes.is_empty()
    }
}
