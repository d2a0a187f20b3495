use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    CacheEntry, Candidate, LinkSource, SourceCache, SourceError, SourceKind, SourceRegistry,
    SourceSnapshot,
};
use crate::config::ResolveSettings;
use crate::loader::{read_local, HttpLoader, PlaylistLoader};
use crate::playlist::{codec, Channel};
use crate::pool::WorkerPool;

/// Outcome of refreshing one source.
#[derive(Debug)]
pub struct RefreshReport {
    pub source_name: String,
    /// Number of cached channels, or why the source could not be refreshed.
    pub result: Result<usize, SourceError>,
}

/// Owns the source registry and the donor cache.
///
/// Loads run concurrently in a [`WorkerPool`]; every registry and cache write
/// happens here on the caller's task, one source at a time.
pub struct LinkSourceManager {
    registry: SourceRegistry,
    cache: SourceCache,
    loader: Arc<dyn PlaylistLoader>,
}

impl LinkSourceManager {
    pub fn new(
        registry: SourceRegistry,
        cache: SourceCache,
        loader: Arc<dyn PlaylistLoader>,
    ) -> Self {
        Self {
            registry,
            cache,
            loader,
        }
    }

    /// Registry at `<dir>/sources.json`, cache files under `<dir>/cache`.
    pub fn open(data_dir: &Path) -> Self {
        Self::open_with_loader(data_dir, Arc::new(HttpLoader::default()))
    }

    pub fn open_with_loader(data_dir: &Path, loader: Arc<dyn PlaylistLoader>) -> Self {
        Self::new(
            SourceRegistry::load(data_dir.join("sources.json")),
            SourceCache::on_disk(data_dir.join("cache")),
            loader,
        )
    }

    pub fn in_memory(loader: Arc<dyn PlaylistLoader>) -> Self {
        Self::new(SourceRegistry::in_memory(), SourceCache::in_memory(), loader)
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn sources(&self) -> &[LinkSource] {
        self.registry.sources()
    }

    pub fn register(&mut self, source: LinkSource) -> Result<(), SourceError> {
        info!(source = %source.name, location = %source.location, "Registering link source");
        self.registry.register(source)
    }

    /// Replace a source, dropping the cache under both its old and new name.
    pub fn update(&mut self, name: &str, source: LinkSource) -> Result<(), SourceError> {
        let stored = self
            .registry
            .get(name)
            .map(|s| s.name.clone())
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        let renamed = source.name.clone();
        self.registry.update(&stored, source)?;
        self.cache.invalidate(&stored);
        self.cache.invalidate(&renamed);
        info!(source = %stored, new_name = %renamed, "Updated link source");
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<LinkSource, SourceError> {
        let removed = self.registry.remove(name)?;
        self.cache.invalidate(&removed.name);
        info!(source = %removed.name, "Removed link source");
        Ok(removed)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), SourceError> {
        self.registry.set_enabled(name, enabled)
    }

    /// Fetch and parse a source's playlist.
    pub async fn load(&self, source: &LinkSource) -> Result<Vec<Channel>, SourceError> {
        load_source(self.loader.as_ref(), source).await
    }

    /// Replace the cached snapshot of `name` and stamp its update time.
    pub fn cache(
        &mut self,
        name: &str,
        channels: &[Channel],
    ) -> Result<Arc<CacheEntry>, SourceError> {
        let entry = self.cache.store(name, channels)?;
        self.registry.touch(name, entry.cached_at)?;
        Ok(entry)
    }

    /// Drop the cache of `name`, reload it and cache the result.
    pub async fn refresh(&mut self, name: &str) -> Result<usize, SourceError> {
        let source = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        self.cache.invalidate(&source.name);
        let channels = self.load(&source).await?;
        let entry = self.cache(&source.name, &channels)?;
        Ok(entry.channels.len())
    }

    /// Refresh the given sources in parallel. Failures are reported per
    /// source and never abort the others.
    pub async fn refresh_sources(
        &mut self,
        sources: Vec<LinkSource>,
        pool: &WorkerPool,
    ) -> Vec<RefreshReport> {
        if sources.is_empty() {
            return Vec::new();
        }
        let names: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();
        let loader = self.loader.clone();
        let cache = &mut self.cache;
        let registry = &mut self.registry;
        let mut reports: Vec<RefreshReport> = Vec::with_capacity(sources.len());

        let summary = pool
            .run(
                sources,
                |_, source| {
                    let loader = loader.clone();
                    async move { load_source(loader.as_ref(), &source).await }
                },
                |idx, loaded, _, _| {
                    let name = &names[idx];
                    let result = loaded.and_then(|channels| {
                        cache.invalidate(name);
                        let entry = cache.store(name, &channels)?;
                        registry.touch(name, entry.cached_at)?;
                        Ok(entry.channels.len())
                    });
                    match &result {
                        Ok(count) => debug!(source = %name, channels = count, "Source refreshed"),
                        Err(e) => warn!(source = %name, error = %e, "Source refresh failed"),
                    }
                    reports.push(RefreshReport {
                        source_name: name.clone(),
                        result,
                    });
                },
            )
            .await;

        for idx in summary.unfinished {
            reports.push(RefreshReport {
                source_name: names[idx].clone(),
                result: Err(SourceError::Cancelled(names[idx].clone())),
            });
        }
        reports
    }

    /// Refresh every enabled source.
    pub async fn refresh_all(&mut self, pool: &WorkerPool) -> Vec<RefreshReport> {
        let sources: Vec<LinkSource> = self.registry.enabled().cloned().collect();
        info!(sources = sources.len(), "Refreshing all link sources");
        self.refresh_sources(sources, pool).await
    }

    /// Load every enabled source whose cache is missing, stale or due for
    /// its automatic refresh. Returns how many were loaded successfully.
    pub async fn warm(&mut self, settings: &ResolveSettings, token: CancellationToken) -> usize {
        let now = Utc::now();
        let enabled: Vec<LinkSource> = self.registry.enabled().cloned().collect();
        let mut missing = Vec::new();
        for source in enabled {
            let fresh = self
                .cache
                .get(&source.name)
                .is_some_and(|e| e.is_fresh(settings.cache_max_age, now));
            if !fresh || source.needs_update(now) {
                missing.push(source);
            }
        }
        if missing.is_empty() {
            return 0;
        }
        let pool = WorkerPool::new(settings.workers, token);
        self.refresh_sources(missing, &pool)
            .await
            .iter()
            .filter(|r| r.result.is_ok())
            .count()
    }

    /// Immutable view of what is cached for the enabled sources right now.
    pub fn snapshot(&mut self) -> SourceSnapshot {
        let mut entries = Vec::new();
        for source in self.registry.enabled() {
            if let Some(entry) = self.cache.get(&source.name) {
                entries.push((source.name.clone(), source.priority, entry));
            }
        }
        SourceSnapshot::new(entries)
    }

    /// Ranked replacement candidates for `channel_name`, loading any source
    /// that is not cached yet.
    pub async fn search(&mut self, channel_name: &str, settings: &ResolveSettings) -> Vec<Candidate> {
        self.warm(settings, CancellationToken::new()).await;
        self.snapshot().search(channel_name, settings)
    }
}

async fn load_source(
    loader: &dyn PlaylistLoader,
    source: &LinkSource,
) -> Result<Vec<Channel>, SourceError> {
    let text = match source.kind {
        SourceKind::Remote => loader.load(&source.location).await?,
        SourceKind::Local => {
            let path = source
                .local_path()
                .unwrap_or_else(|| source.location.clone().into());
            read_local(&path).await?
        }
    };
    let (_, channels) = codec::parse(&text);
    debug!(source = %source.name, channels = channels.len(), "Loaded link source");
    Ok(channels)
}
