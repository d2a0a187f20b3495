use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::playlist::Channel;
use crate::resolver::matching::normalize;

/// Stable file key for a source: first 16 hex chars of SHA-256 of its name.
pub fn cache_key(source_name: &str) -> String {
    let digest = Sha256::digest(source_name.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(16);
    key
}

/// The part of a donor channel needed to propose it as a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedChannel {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tvg_id: String,
}

impl From<&Channel> for CachedChannel {
    fn from(channel: &Channel) -> Self {
        Self {
            name: channel.name.clone(),
            url: channel.primary_url().to_string(),
            group: channel.group().to_string(),
            tvg_id: channel.tvg_id.clone(),
        }
    }
}

/// Cached snapshot of one donor playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_name: String,
    pub cached_at: DateTime<Utc>,
    pub channels: Vec<CachedChannel>,
    /// Normalized channel name to the positions in `channels` carrying it.
    pub index: BTreeMap<String, Vec<usize>>,
}

impl CacheEntry {
    pub fn build(source_name: &str, channels: &[Channel], cached_at: DateTime<Utc>) -> Self {
        let channels: Vec<CachedChannel> = channels
            .iter()
            .filter(|c| c.has_url())
            .map(CachedChannel::from)
            .collect();
        let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (pos, c) in channels.iter().enumerate() {
            index.entry(normalize(&c.name)).or_default().push(pos);
        }
        Self {
            source_name: source_name.to_string(),
            cached_at,
            channels,
            index,
        }
    }

    /// Channels whose normalized name equals that of `name`, in file order.
    pub fn named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a CachedChannel> + 'a {
        self.index
            .get(&normalize(name))
            .into_iter()
            .flatten()
            .filter_map(|&pos| self.channels.get(pos))
    }

    pub fn is_fresh(&self, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
        match max_age {
            None => true,
            Some(max) => match chrono::Duration::from_std(max) {
                Ok(max) => now - self.cached_at <= max,
                Err(_) => true,
            },
        }
    }
}

/// Two-level cache of donor snapshots: memory in front of one JSON file per
/// source.
///
/// Only the coordinating task writes to it, one source at a time.
#[derive(Debug, Default)]
pub struct SourceCache {
    dir: Option<PathBuf>,
    memory: HashMap<String, Arc<CacheEntry>>,
}

impl SourceCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            memory: HashMap::new(),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn path_for(&self, source_name: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.json", cache_key(source_name))))
    }

    /// Cached entry for `source_name`, reading through to disk on a memory
    /// miss. Unreadable or foreign files count as a miss.
    pub fn get(&mut self, source_name: &str) -> Option<Arc<CacheEntry>> {
        if let Some(entry) = self.memory.get(source_name) {
            return Some(entry.clone());
        }
        let path = self.path_for(source_name)?;
        let content = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source = source_name, path = %path.display(), error = %e, "Corrupt source cache, ignoring");
                return None;
            }
        };
        if entry.source_name != source_name {
            warn!(source = source_name, found = %entry.source_name, "Cache file belongs to another source");
            return None;
        }
        debug!(source = source_name, channels = entry.channels.len(), "Loaded source cache from disk");
        let entry = Arc::new(entry);
        self.memory.insert(source_name.to_string(), entry.clone());
        Some(entry)
    }

    pub fn store(
        &mut self,
        source_name: &str,
        channels: &[Channel],
    ) -> Result<Arc<CacheEntry>, StoreError> {
        let entry = CacheEntry::build(source_name, channels, Utc::now());
        if let Some(path) = self.path_for(source_name) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            let json = serde_json::to_string(&entry)?;
            std::fs::write(&path, json).map_err(|e| StoreError::io(&path, e))?;
        }
        debug!(source = source_name, channels = entry.channels.len(), "Cached source");
        let entry = Arc::new(entry);
        self.memory.insert(source_name.to_string(), entry.clone());
        Ok(entry)
    }

    pub fn invalidate(&mut self, source_name: &str) {
        self.memory.remove(source_name);
        if let Some(path) = self.path_for(source_name) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(source = source_name, error = %e, "Failed to delete source cache");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donors() -> Vec<Channel> {
        vec![
            Channel::new("ESPN HD", "http://d/espn\nhttp://d/espn-backup"),
            Channel::new("espn  hd", "http://d/espn2"),
            Channel::new("CNN", ""),
        ]
    }

    #[test]
    fn key_is_stable_and_short() {
        assert_eq!(cache_key("backup"), cache_key("backup"));
        assert_ne!(cache_key("backup"), cache_key("Backup"));
        assert_eq!(cache_key("backup").len(), 16);
    }

    #[test]
    fn entry_indexes_by_normalized_name() {
        let entry = CacheEntry::build("s", &donors(), Utc::now());
        assert_eq!(entry.channels.len(), 2);
        let urls: Vec<&str> = entry.named("ESPN HD").map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["http://d/espn", "http://d/espn2"]);
        assert_eq!(entry.named("espn hd").next().map(|c| c.name.as_str()), Some("ESPN HD"));
        assert_eq!(entry.named("CNN").count(), 0);
    }

    #[test]
    fn freshness_uses_max_age() {
        let now = Utc::now();
        let entry = CacheEntry::build("s", &[], now - chrono::Duration::hours(3));
        assert!(entry.is_fresh(None, now));
        assert!(entry.is_fresh(Some(Duration::from_secs(4 * 3600)), now));
        assert!(!entry.is_fresh(Some(Duration::from_secs(3600)), now));
    }

    #[test]
    fn disk_round_trip_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SourceCache::on_disk(dir.path().join("cache"));
        let stored = cache.store("donor", &donors()).unwrap();
        let path = cache.path_for("donor").unwrap();
        assert!(path.exists());

        let mut fresh = SourceCache::on_disk(dir.path().join("cache"));
        assert_eq!(fresh.get("donor").unwrap().channels, stored.channels);

        fresh.invalidate("donor");
        assert!(!path.exists());
        assert!(fresh.get("donor").is_none());
    }

    #[test]
    fn corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SourceCache::on_disk(dir.path());
        std::fs::write(cache.path_for("x").unwrap(), "not json").unwrap();
        assert!(cache.get("x").is_none());
    }
}
