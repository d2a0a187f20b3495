use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::playlist::Channel;

/// A deny rule: case-insensitive substring on the channel name, or exact
/// case-insensitive `tvg-id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tvg_id: String,
    pub added_date: DateTime<Utc>,
}

impl BlacklistEntry {
    pub fn new(name: impl Into<String>, tvg_id: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            tvg_id: tvg_id.into().trim().to_string(),
            added_date: Utc::now(),
        }
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        let by_name = !self.name.is_empty()
            && channel
                .name
                .to_lowercase()
                .contains(&self.name.to_lowercase());
        let by_id = !self.tvg_id.is_empty() && channel.tvg_id.eq_ignore_ascii_case(&self.tvg_id);
        by_name || by_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blacklist {
    entries: Vec<BlacklistEntry>,
}

impl Blacklist {
    pub fn new(entries: Vec<BlacklistEntry>) -> Self {
        Self { entries }
    }

    /// Read the persisted list. A missing or unreadable file yields an empty
    /// list; it is rewritten on the next save.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No blacklist file, starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str::<Vec<BlacklistEntry>>(&content) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt blacklist file, starting empty");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(path, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json).map_err(|e| StoreError::io(path, e))
    }

    pub fn entries(&self) -> &[BlacklistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns false for empty or already-present rules.
    pub fn add(&mut self, name: impl Into<String>, tvg_id: impl Into<String>) -> bool {
        let entry = BlacklistEntry::new(name, tvg_id);
        if entry.name.is_empty() && entry.tvg_id.is_empty() {
            return false;
        }
        let exists = self.entries.iter().any(|e| {
            e.name.eq_ignore_ascii_case(&entry.name) && e.tvg_id.eq_ignore_ascii_case(&entry.tvg_id)
        });
        if exists {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<BlacklistEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.entries.iter().any(|e| e.matches(channel))
    }

    /// Split out every channel matched by any rule.
    pub fn filter(&self, channels: Vec<Channel>) -> (Vec<Channel>, usize) {
        if self.entries.is_empty() {
            return (channels, 0);
        }
        let before = channels.len();
        let kept: Vec<Channel> = channels.into_iter().filter(|c| !self.matches(c)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            debug!(removed, "Blacklist removed channels");
        }
        (kept, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<Channel> {
        vec![
            Channel::new("Disney Channel HD", "http://a/1"),
            Channel::new("CNN", "http://a/2").with_tvg_id("cnn.us"),
            Channel::new("Playhouse DISNEY", "http://a/3"),
            Channel::new("BBC One", "http://a/4").with_tvg_id("bbc1.uk"),
        ]
    }

    #[test]
    fn name_substring_is_case_insensitive() {
        let mut bl = Blacklist::default();
        bl.add("disney", "");
        let (kept, removed) = bl.filter(channels());
        assert_eq!(removed, 2);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| !c.name.to_lowercase().contains("disney")));
    }

    #[test]
    fn tvg_id_must_match_exactly() {
        let mut bl = Blacklist::default();
        bl.add("", "CNN.US");
        bl.add("", "bbc1");
        let (kept, removed) = bl.filter(channels());
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().any(|c| c.name == "BBC One"));
    }

    #[test]
    fn add_rejects_empty_and_duplicates() {
        let mut bl = Blacklist::default();
        assert!(!bl.add("  ", ""));
        assert!(bl.add("Adult", ""));
        assert!(!bl.add("adult", ""));
        assert_eq!(bl.len(), 1);
        assert!(bl.remove(5).is_none());
        assert!(bl.remove(0).is_some());
        assert!(bl.is_empty());
    }

    #[test]
    fn persistence_tolerates_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("blacklist.json");
        assert!(Blacklist::load(&path).is_empty());

        let mut bl = Blacklist::default();
        bl.add("Shopping", "");
        bl.add("", "qvc.us");
        bl.save(&path).unwrap();
        assert_eq!(Blacklist::load(&path), bl);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(Blacklist::load(&path).is_empty());
    }
}
