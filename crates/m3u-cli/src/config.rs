//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/m3u-doctor"
//! log_format = "json"
//!
//! [probe]
//! timeout_ms = 8000
//! workers = 10
//!
//! [resolve]
//! match_mode = "fuzzy"
//! fuzzy_threshold = 0.6
//! allow_list = ["premium", "cdn.trusted.tv"]
//! deny_list = ["spam.tv"]
//!
//! [[source]]
//! name = "premium"
//! location = "https://lists.example.com/premium.m3u"
//! priority = 10
//! auto_update_hours = 24
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use m3u_core::{
    LinkSource, LinkSourceManager, MatchMode, ProbeConfig, ResolveSettings, SourceKind,
};

const APP_DIR: &str = "m3u-doctor";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub probe: ProbeSection,

    #[serde(default)]
    pub resolve: ResolveSection,

    #[serde(default)]
    pub source: Vec<SourceDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Registry, donor cache and blacklist live here.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeSection {
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub workers: Option<usize>,
    pub max_url_length: Option<usize>,
    pub tls_fallback: Option<bool>,
    pub stop_grace_ms: Option<u64>,
    pub batch_deadline_ms: Option<u64>,
    pub user_agent: Option<String>,
}

impl ProbeSection {
    pub fn to_probe_config(&self) -> ProbeConfig {
        let mut c = ProbeConfig::default();
        if let Some(v) = self.timeout_ms {
            c = c.with_request_timeout(v);
        }
        if let Some(v) = self.connect_timeout_ms {
            c = c.with_connect_timeout(v);
        }
        if let Some(v) = self.workers {
            c = c.with_workers(v);
        }
        if let Some(v) = self.max_url_length {
            c = c.with_max_url_length(v);
        }
        if let Some(v) = self.tls_fallback {
            c = c.with_tls_fallback(v);
        }
        if let Some(v) = self.stop_grace_ms {
            c = c.with_stop_grace(v);
        }
        if let Some(v) = self.batch_deadline_ms {
            c = c.with_batch_deadline(Some(v));
        }
        if let Some(ref v) = self.user_agent {
            c = c.with_user_agent(v.clone());
        }
        c
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveSection {
    pub match_mode: Option<MatchMode>,
    pub similarity_threshold: Option<f64>,
    pub fuzzy_threshold: Option<f64>,
    pub max_alternatives: Option<usize>,
    pub prioritize_allowed: Option<bool>,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
    /// Replaces the built-in unsafe URL patterns when set.
    pub unsafe_patterns: Option<Vec<String>>,
    pub workers: Option<usize>,
    pub cache_max_age_hours: Option<u64>,
}

impl ResolveSection {
    pub fn to_settings(&self) -> ResolveSettings {
        let mut s = ResolveSettings::default()
            .with_allow_list(self.allow_list.clone())
            .with_deny_list(self.deny_list.clone())
            .with_cache_max_age(self.cache_max_age_hours);
        if let Some(v) = self.match_mode {
            s = s.with_match_mode(v);
        }
        if let Some(v) = self.similarity_threshold {
            s = s.with_similarity_threshold(v);
        }
        if let Some(v) = self.fuzzy_threshold {
            s = s.with_fuzzy_threshold(v);
        }
        if let Some(v) = self.max_alternatives {
            s = s.with_max_alternatives(v);
        }
        if let Some(v) = self.prioritize_allowed {
            s = s.with_prioritize_allowed(v);
        }
        if let Some(ref v) = self.unsafe_patterns {
            s = s.with_unsafe_patterns(v.clone());
        }
        if let Some(v) = self.workers {
            s = s.with_workers(v);
        }
        s
    }
}

/// A link source declared in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_update_hours: u32,
}

fn default_enabled() -> bool {
    true
}

impl SourceDef {
    pub fn to_link_source(&self) -> LinkSource {
        let mut source = LinkSource::new(&self.name, &self.location)
            .with_priority(self.priority)
            .with_tags(self.tags.clone())
            .with_auto_update_hours(self.auto_update_hours);
        source.enabled = self.enabled;
        source.description = self.description.clone();
        source
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist. Without one, the per-user config file is
    /// read when present and built-in defaults are used otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, String> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
    }

    /// Register configured sources the registry does not know yet.
    /// Sources already registered keep their stored settings.
    pub fn seed_sources(&self, manager: &mut LinkSourceManager) -> usize {
        let mut added = 0;
        for def in &self.source {
            if manager.registry().contains(&def.name) {
                continue;
            }
            match manager.register(def.to_link_source()) {
                Ok(()) => added += 1,
                Err(e) => {
                    tracing::warn!(source = %def.name, error = %e, "Skipping configured source")
                }
            }
        }
        added
    }

    fn validate(&self) -> Result<(), String> {
        match self.storage.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        for (key, value) in [
            ("similarity_threshold", self.resolve.similarity_threshold),
            ("fuzzy_threshold", self.resolve.fuzzy_threshold),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(format!("{} must be between 0 and 1, got {}", key, v));
                }
            }
        }

        if self.probe.workers == Some(0) || self.resolve.workers == Some(0) {
            return Err("workers must be at least 1".into());
        }

        let mut names = HashSet::new();
        for (i, s) in self.source.iter().enumerate() {
            let name = s.name.trim();
            if name.is_empty() {
                return Err(format!("Source name at index {} must not be empty", i));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(format!("Duplicate source name: {}", name));
            }
            if s.location.trim().is_empty() {
                return Err(format!("Source '{}' has no location", name));
            }
            if SourceKind::infer(&s.location) == SourceKind::Remote {
                url::Url::parse(s.location.trim()).map_err(|e| {
                    format!("Invalid URL for source '{}': {} ({})", name, s.location, e)
                })?;
            }
        }

        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}
