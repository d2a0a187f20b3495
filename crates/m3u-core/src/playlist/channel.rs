use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group assigned to channels that carry no `group-title`.
pub const UNGROUPED: &str = "Ungrouped";

/// Number of URL replacements remembered per channel.
pub const MAX_REPLACEMENT_HISTORY: usize = 10;

pub(crate) const OPT_USER_AGENT: &str = "#EXTVLCOPT:http-user-agent=";
pub(crate) const OPT_REFERRER: &str = "#EXTVLCOPT:http-referrer=";
pub(crate) const OPT_REFERER: &str = "#EXTVLCOPT:http-referer=";
pub(crate) const OPT_HEADER: &str = "#EXTVLCOPT:http-header=";

const HEADER_USER_AGENT: &str = "User-Agent";
const HEADER_REFERER: &str = "Referer";

/// Tri-state reachability of a channel's stream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Reachable => write!(f, "ok"),
            Self::Unreachable => write!(f, "broken"),
        }
    }
}

/// One entry of a channel's replacement history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementRecord {
    pub old_url: String,
    pub new_url: String,
    pub reason: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered HTTP headers with case-preserving keys. Lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value of an existing key in place, or append a new entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// User agent and referer have dedicated option lines, so they are stored
/// under one spelling whichever line they were read from.
fn canonical_header_key(key: &str) -> String {
    if key.eq_ignore_ascii_case(HEADER_USER_AGENT) {
        HEADER_USER_AGENT.to_string()
    } else if key.eq_ignore_ascii_case(HEADER_REFERER) {
        HEADER_REFERER.to_string()
    } else {
        key.to_string()
    }
}

/// A single playlist entry.
///
/// Structured fields are the single source of truth: the `#EXTINF` line and
/// the recognised vendor option lines are regenerated from them on serialize.
/// `group` is never empty and the `User-Agent` header always mirrors
/// `user_agent`.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    group: String,
    pub tvg_id: String,
    pub tvg_logo: String,
    /// Stream link. Providers may embed newline-separated fallbacks.
    pub url: String,
    /// Duration token of the directive, usually `-1`.
    pub duration: String,
    /// Directive attributes other than `tvg-id`, `tvg-logo` and `group-title`.
    pub extra_attrs: Vec<(String, String)>,
    user_agent: String,
    headers: HeaderList,
    /// Unrecognised vendor lines, kept verbatim.
    raw_options: Vec<String>,
    pub url_status: UrlStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Provenance of the current URL; empty when user-entered.
    pub link_source: String,
    replacement_history: VecDeque<ReplacementRecord>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            name: String::new(),
            group: UNGROUPED.to_string(),
            tvg_id: String::new(),
            tvg_logo: String::new(),
            url: String::new(),
            duration: "-1".to_string(),
            extra_attrs: Vec::new(),
            user_agent: String::new(),
            headers: HeaderList::new(),
            raw_options: Vec::new(),
            url_status: UrlStatus::Unknown,
            last_checked_at: None,
            link_source: String::new(),
            replacement_history: VecDeque::with_capacity(MAX_REPLACEMENT_HISTORY),
        }
    }
}

impl Channel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.set_group(group);
        self
    }

    pub fn with_tvg_id(mut self, tvg_id: impl Into<String>) -> Self {
        self.tvg_id = tvg_id.into();
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Blank groups fall back to [`UNGROUPED`].
    pub fn set_group(&mut self, group: impl Into<String>) {
        let group = group.into();
        let trimmed = group.trim();
        self.group = if trimmed.is_empty() {
            UNGROUPED.to_string()
        } else {
            trimmed.to_string()
        };
    }

    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// First non-blank line of the URL; the one that gets probed.
    pub fn primary_url(&self) -> &str {
        self.url
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        let ua = user_agent.into().trim().to_string();
        if ua.is_empty() {
            self.headers.remove(HEADER_USER_AGENT);
        } else {
            self.headers.insert(HEADER_USER_AGENT, ua.clone());
        }
        self.user_agent = ua;
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = canonical_header_key(key.into().trim());
        let value = value.into().trim().to_string();
        if key.is_empty() {
            return;
        }
        if value.is_empty() {
            self.remove_header(&key);
            return;
        }
        if key.eq_ignore_ascii_case(HEADER_USER_AGENT) {
            self.user_agent = value.clone();
        }
        self.headers.insert(key, value);
    }

    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        if key.eq_ignore_ascii_case(HEADER_USER_AGENT) {
            self.user_agent.clear();
        }
        self.headers.remove(key)
    }

    pub fn raw_options(&self) -> &[String] {
        &self.raw_options
    }

    /// Regenerate the vendor option lines from the structured fields.
    ///
    /// Recognised lines come first, in header order, followed by the
    /// unrecognised lines exactly as they were read.
    pub fn vendor_options(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.headers.len() + self.raw_options.len());
        for (key, value) in self.headers.iter() {
            if key.eq_ignore_ascii_case(HEADER_USER_AGENT) {
                lines.push(format!("{}{}", OPT_USER_AGENT, value));
            } else if key.eq_ignore_ascii_case(HEADER_REFERER) {
                lines.push(format!("{}{}", OPT_REFERRER, value));
            } else {
                lines.push(format!("{}{}: {}", OPT_HEADER, key, value));
            }
        }
        lines.extend(self.raw_options.iter().cloned());
        lines
    }

    /// Replace every vendor option line, re-deriving user agent and headers.
    pub fn set_vendor_options<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.user_agent.clear();
        self.headers = HeaderList::new();
        self.raw_options.clear();
        for line in lines {
            self.push_vendor_option(line.as_ref());
        }
    }

    pub(crate) fn push_vendor_option(&mut self, line: &str) {
        let trimmed = line.trim();
        if let Some(value) = strip_prefix_ignore_case(trimmed, OPT_USER_AGENT) {
            self.set_user_agent(value);
        } else if let Some(value) = strip_prefix_ignore_case(trimmed, OPT_REFERRER)
            .or_else(|| strip_prefix_ignore_case(trimmed, OPT_REFERER))
        {
            self.set_header(HEADER_REFERER, value);
        } else if let Some((key, value)) =
            strip_prefix_ignore_case(trimmed, OPT_HEADER).and_then(|rest| rest.split_once(':'))
        {
            self.set_header(key, value);
        } else {
            self.raw_options.push(line.trim_end().to_string());
        }
    }

    pub fn replacement_history(&self) -> impl Iterator<Item = &ReplacementRecord> {
        self.replacement_history.iter()
    }

    pub fn replacement_count(&self) -> usize {
        self.replacement_history.len()
    }

    /// Swap in a new URL, remembering the old one.
    ///
    /// The status goes back to unknown; callers that already verified the new
    /// link follow up with [`Channel::mark_checked`].
    pub fn replace_url(
        &mut self,
        new_url: impl Into<String>,
        reason: impl Into<String>,
        source: impl Into<String>,
    ) {
        let new_url = new_url.into();
        let source = source.into();
        let record = ReplacementRecord {
            old_url: std::mem::take(&mut self.url),
            new_url: new_url.clone(),
            reason: reason.into(),
            source: source.clone(),
            timestamp: Utc::now(),
        };
        if self.replacement_history.len() >= MAX_REPLACEMENT_HISTORY {
            self.replacement_history.pop_front();
        }
        self.replacement_history.push_back(record);
        self.url = new_url;
        self.link_source = source;
        self.url_status = UrlStatus::Unknown;
        self.last_checked_at = None;
    }

    pub fn mark_checked(&mut self, status: UrlStatus, at: DateTime<Utc>) {
        self.url_status = status;
        self.last_checked_at = Some(at);
    }

    /// Copy EPG id, logo, group and user agent from `other`. Link state and
    /// history are left alone.
    pub fn update_metadata_from(&mut self, other: &Channel) {
        self.tvg_id = other.tvg_id.clone();
        self.tvg_logo = other.tvg_logo.clone();
        self.set_group(other.group.clone());
        self.set_user_agent(other.user_agent.clone());
    }

    /// Link missing, or probed and found dead.
    pub fn is_broken(&self) -> bool {
        !self.has_url() || self.url_status == UrlStatus::Unreachable
    }
}

pub(crate) fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_group_falls_back_to_sentinel() {
        let mut ch = Channel::new("News", "http://a/1");
        ch.set_group("   ");
        assert_eq!(ch.group(), UNGROUPED);
        ch.set_group(" Sports ");
        assert_eq!(ch.group(), "Sports");
        assert_eq!(Channel::default().group(), UNGROUPED);
    }

    #[test]
    fn user_agent_mirrors_header() {
        let mut ch = Channel::new("A", "http://a");
        ch.set_user_agent("VLC/3.0");
        assert_eq!(ch.headers().get("user-agent"), Some("VLC/3.0"));

        ch.set_header("user-agent", "Kodi");
        assert_eq!(ch.user_agent(), "Kodi");
        assert_eq!(ch.headers().len(), 1);

        ch.remove_header("USER-AGENT");
        assert_eq!(ch.user_agent(), "");
        assert!(ch.headers().is_empty());

        ch.set_header("referer", "http://r/");
        assert_eq!(ch.headers().iter().next(), Some(("Referer", "http://r/")));
        assert_eq!(ch.vendor_options(), vec!["#EXTVLCOPT:http-referrer=http://r/"]);
    }

    #[test]
    fn vendor_options_follow_header_order() {
        let mut ch = Channel::new("A", "http://a");
        ch.set_vendor_options([
            "#EXTVLCOPT:http-referrer=http://ref/",
            "#KODIPROP:inputstream=adaptive",
            "#EXTVLCOPT:http-user-agent=Mozilla",
            "#EXTVLCOPT:http-header=X-Token: abc",
        ]);
        assert_eq!(ch.user_agent(), "Mozilla");
        assert_eq!(ch.headers().get("Referer"), Some("http://ref/"));
        assert_eq!(ch.headers().get("x-token"), Some("abc"));
        assert_eq!(
            ch.vendor_options(),
            vec![
                "#EXTVLCOPT:http-referrer=http://ref/".to_string(),
                "#EXTVLCOPT:http-user-agent=Mozilla".to_string(),
                "#EXTVLCOPT:http-header=X-Token: abc".to_string(),
                "#KODIPROP:inputstream=adaptive".to_string(),
            ]
        );
    }

    #[test]
    fn editing_headers_regenerates_options() {
        let mut ch = Channel::new("A", "http://a");
        ch.set_vendor_options(["#EXTVLCOPT:http-header=X-A: 1"]);
        ch.set_header("X-A", "2");
        assert_eq!(ch.vendor_options(), vec!["#EXTVLCOPT:http-header=X-A: 2"]);
    }

    #[test]
    fn history_is_capped_and_evicts_oldest() {
        let mut ch = Channel::new("A", "http://u/0");
        for i in 1..=15 {
            ch.replace_url(format!("http://u/{}", i), "broken", "donor");
        }
        assert_eq!(ch.replacement_count(), MAX_REPLACEMENT_HISTORY);
        let first = ch.replacement_history().next().unwrap();
        assert_eq!(first.old_url, "http://u/5");
        assert_eq!(first.new_url, "http://u/6");
        assert_eq!(ch.url, "http://u/15");
        assert_eq!(ch.link_source, "donor");
    }

    #[test]
    fn metadata_copy_leaves_link_state_alone() {
        let mut target = Channel::new("ESPN", "http://old/espn");
        target.mark_checked(UrlStatus::Unreachable, Utc::now());
        target.replace_url("http://new/espn", "broken", "donor");
        target.mark_checked(UrlStatus::Reachable, Utc::now());

        let mut other = Channel::new("ESPN", "http://other/espn")
            .with_group("Sports")
            .with_tvg_id("espn.us");
        other.tvg_logo = "http://logo/espn.png".into();
        other.set_user_agent("Mozilla/5.0");

        target.update_metadata_from(&other);
        assert_eq!(target.tvg_id, "espn.us");
        assert_eq!(target.tvg_logo, "http://logo/espn.png");
        assert_eq!(target.group(), "Sports");
        assert_eq!(target.user_agent(), "Mozilla/5.0");
        assert_eq!(target.url, "http://new/espn");
        assert_eq!(target.url_status, UrlStatus::Reachable);
        assert_eq!(target.replacement_count(), 1);
    }

    #[test]
    fn primary_url_takes_first_line() {
        let ch = Channel::new("A", "\nhttp://a/1\nhttp://a/2");
        assert_eq!(ch.primary_url(), "http://a/1");
        assert!(ch.has_url());
        assert!(!Channel::new("B", "  ").has_url());
        assert!(Channel::new("B", "").is_broken());
    }
}
