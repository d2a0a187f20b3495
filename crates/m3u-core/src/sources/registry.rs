use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{LinkSource, SourceError};
use crate::error::StoreError;

/// Ordered, persisted list of link sources. Names are unique ignoring case.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    path: Option<PathBuf>,
    sources: Vec<LinkSource>,
}

impl SourceRegistry {
    /// In-memory registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing or corrupt file yields an empty registry
    /// that is rewritten on the next change.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sources = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<LinkSource>>(&content) {
                Ok(sources) => sources,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt source registry, starting empty");
                    Vec::new()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No source registry, starting empty");
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            sources,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(path, e))?;
        }
        let json = serde_json::to_string_pretty(&self.sources)?;
        std::fs::write(path, json).map_err(|e| StoreError::io(path, e))
    }

    pub fn sources(&self) -> &[LinkSource] {
        &self.sources
    }

    pub fn enabled(&self) -> impl Iterator<Item = &LinkSource> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LinkSource> {
        self.position(name).map(|i| &self.sources[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.sources
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn register(&mut self, source: LinkSource) -> Result<(), SourceError> {
        if source.name.trim().is_empty() {
            return Err(SourceError::EmptyName);
        }
        if self.contains(&source.name) {
            return Err(SourceError::Duplicate(source.name));
        }
        self.sources.push(source);
        self.save()?;
        Ok(())
    }

    /// Replace the source called `name`, possibly under a new name.
    pub fn update(&mut self, name: &str, source: LinkSource) -> Result<(), SourceError> {
        if source.name.trim().is_empty() {
            return Err(SourceError::EmptyName);
        }
        let idx = self
            .position(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        if let Some(other) = self.position(&source.name) {
            if other != idx {
                return Err(SourceError::Duplicate(source.name));
            }
        }
        self.sources[idx] = source;
        self.save()?;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<LinkSource, SourceError> {
        let idx = self
            .position(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        let removed = self.sources.remove(idx);
        self.save()?;
        Ok(removed)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), SourceError> {
        let idx = self
            .position(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        self.sources[idx].enabled = enabled;
        self.save()?;
        Ok(())
    }

    pub(crate) fn touch(
        &mut self,
        name: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), SourceError> {
        let idx = self
            .position(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        self.sources[idx].last_updated = Some(at);
        self.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_duplicates_ignoring_case() {
        let mut reg = SourceRegistry::in_memory();
        reg.register(LinkSource::new("Backup", "/a.m3u")).unwrap();
        let err = reg.register(LinkSource::new("backup", "/b.m3u")).unwrap_err();
        assert!(matches!(err, SourceError::Duplicate(_)));
        assert!(matches!(
            reg.register(LinkSource::new("  ", "/c.m3u")),
            Err(SourceError::EmptyName)
        ));
    }

    #[test]
    fn update_can_rename_but_not_collide() {
        let mut reg = SourceRegistry::in_memory();
        reg.register(LinkSource::new("a", "/a.m3u")).unwrap();
        reg.register(LinkSource::new("b", "/b.m3u")).unwrap();

        reg.update("a", LinkSource::new("c", "/a.m3u").with_priority(3))
            .unwrap();
        assert!(reg.get("a").is_none());
        assert_eq!(reg.get("c").map(|s| s.priority), Some(3));

        let err = reg.update("c", LinkSource::new("B", "/a.m3u")).unwrap_err();
        assert!(matches!(err, SourceError::Duplicate(_)));
        assert!(matches!(
            reg.update("zzz", LinkSource::new("zzz", "/z.m3u")),
            Err(SourceError::NotFound(_))
        ));
    }

    #[test]
    fn persists_and_tolerates_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");

        let mut reg = SourceRegistry::load(&path);
        assert!(reg.is_empty());
        reg.register(LinkSource::new("one", "http://lists.tv/one.m3u"))
            .unwrap();
        reg.register(LinkSource::new("two", "/srv/two.m3u")).unwrap();
        reg.set_enabled("two", false).unwrap();

        let reloaded = SourceRegistry::load(&path);
        assert_eq!(reloaded.sources(), reg.sources());
        assert_eq!(reloaded.enabled().count(), 1);

        std::fs::write(&path, "[{broken").unwrap();
        assert!(SourceRegistry::load(&path).is_empty());
    }

    #[test]
    fn remove_returns_the_source() {
        let mut reg = SourceRegistry::in_memory();
        reg.register(LinkSource::new("a", "/a.m3u")).unwrap();
        assert_eq!(reg.remove("A").unwrap().name, "a");
        assert!(matches!(reg.remove("a"), Err(SourceError::NotFound(_))));
    }
}
