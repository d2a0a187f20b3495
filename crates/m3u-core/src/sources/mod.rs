mod cache;
mod manager;
mod registry;
mod snapshot;

pub use cache::{cache_key, CacheEntry, CachedChannel, SourceCache};
pub use manager::{LinkSourceManager, RefreshReport};
pub use registry::SourceRegistry;
pub use snapshot::{Candidate, SourceSnapshot, Trust};

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StoreError;
use crate::loader::LoadError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("A link source named '{0}' already exists")]
    Duplicate(String),
    #[error("No link source named '{0}'")]
    NotFound(String),
    #[error("Link source name must not be empty")]
    EmptyName,
    #[error("Refresh of '{0}' was cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    Remote,
}

impl SourceKind {
    pub fn infer(location: &str) -> Self {
        let lower = location.trim().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A registered donor playlist searched for replacement links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSource {
    pub name: String,
    /// File path or http(s) URL.
    pub location: String,
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher wins ties between equally trusted candidates.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Refresh interval in hours; 0 disables automatic refresh.
    #[serde(default)]
    pub auto_update_hours: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl LinkSource {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        let location = location.into().trim().to_string();
        Self {
            name: name.into().trim().to_string(),
            kind: SourceKind::infer(&location),
            location,
            enabled: true,
            priority: 0,
            tags: Vec::new(),
            description: String::new(),
            auto_update_hours: 0,
            last_updated: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_auto_update_hours(mut self, hours: u32) -> Self {
        self.auto_update_hours = hours;
        self
    }

    /// Whether the automatic refresh interval has elapsed.
    pub fn needs_update(&self, now: DateTime<Utc>) -> bool {
        if self.auto_update_hours == 0 {
            return false;
        }
        match self.last_updated {
            Some(at) => now - at >= chrono::Duration::hours(i64::from(self.auto_update_hours)),
            None => true,
        }
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        if self.kind != SourceKind::Local {
            return None;
        }
        let path = self
            .location
            .strip_prefix("file://")
            .unwrap_or(&self.location);
        Some(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_inferred_from_location() {
        assert_eq!(SourceKind::infer("HTTPS://lists.tv/a.m3u"), SourceKind::Remote);
        assert_eq!(SourceKind::infer("/srv/lists/a.m3u"), SourceKind::Local);
        assert_eq!(SourceKind::infer("file:///srv/a.m3u"), SourceKind::Local);
        let src = LinkSource::new("a", "file:///srv/a.m3u");
        assert_eq!(src.local_path(), Some(PathBuf::from("/srv/a.m3u")));
    }

    #[test]
    fn needs_update_respects_interval() {
        let now = Utc::now();
        let mut src = LinkSource::new("a", "http://x/a.m3u");
        assert!(!src.needs_update(now));
        src.auto_update_hours = 6;
        assert!(src.needs_update(now));
        src.last_updated = Some(now - chrono::Duration::hours(2));
        assert!(!src.needs_update(now));
        src.last_updated = Some(now - chrono::Duration::hours(7));
        assert!(src.needs_update(now));
    }

    #[test]
    fn registry_json_fills_defaults() {
        let src: LinkSource =
            serde_json::from_str(r#"{"name":"a","location":"/x.m3u","kind":"local"}"#).unwrap();
        assert!(src.enabled);
        assert_eq!(src.priority, 0);
        assert!(src.last_updated.is_none());
    }
}
