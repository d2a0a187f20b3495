use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolver::MatchMode;

pub const DEFAULT_USER_AGENT: &str = concat!("m3u-doctor/", env!("CARGO_PKG_VERSION"));

/// Configuration for URL health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Per-request timeout (default: 10s).
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Maximum probes in flight (default: 5).
    pub workers: usize,
    /// URLs longer than this fail without a network attempt.
    pub max_url_length: usize,
    /// Retry once ignoring certificate errors before declaring failure.
    pub tls_fallback: bool,
    /// How long in-flight probes may run after cancellation before the pool
    /// stops waiting for them.
    pub stop_grace: Duration,
    /// Optional deadline for a whole batch.
    pub batch_deadline: Option<Duration>,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            workers: 5,
            max_url_length: 2048,
            tls_fallback: true,
            stop_grace: Duration::from_secs(5),
            batch_deadline: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms.max(1));
        if self.connect_timeout > self.request_timeout {
            self.connect_timeout = self.request_timeout;
        }
        self
    }

    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout = Duration::from_millis(ms.max(1)).min(self.request_timeout);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_url_length(mut self, len: usize) -> Self {
        self.max_url_length = len.max(8);
        self
    }

    pub fn with_tls_fallback(mut self, enabled: bool) -> Self {
        self.tls_fallback = enabled;
        self
    }

    pub fn with_stop_grace(mut self, ms: u64) -> Self {
        self.stop_grace = Duration::from_millis(ms);
        self
    }

    pub fn with_batch_deadline(mut self, ms: Option<u64>) -> Self {
        self.batch_deadline = ms.map(|ms| Duration::from_millis(ms.max(1)));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        if !user_agent.trim().is_empty() {
            self.user_agent = user_agent;
        }
        self
    }
}

/// Settings that drive replacement-link search and selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveSettings {
    pub match_mode: MatchMode,
    /// Minimum character-overlap ratio for [`MatchMode::Similar`].
    pub similarity_threshold: f64,
    /// Minimum token-overlap ratio for [`MatchMode::Fuzzy`].
    pub fuzzy_threshold: f64,
    pub max_alternatives: usize,
    pub prioritize_allowed: bool,
    /// Source names or URL hosts whose candidates are preferred.
    pub allow_list: Vec<String>,
    /// Source names or URL hosts whose candidates are never used.
    pub deny_list: Vec<String>,
    /// URL substrings marking temporary or unsafe links.
    pub unsafe_patterns: Vec<String>,
    /// Channels resolved concurrently in a batch repair.
    pub workers: usize,
    /// Caches older than this are refetched before searching.
    pub cache_max_age: Option<Duration>,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::Fuzzy,
            similarity_threshold: 0.8,
            fuzzy_threshold: 0.7,
            max_alternatives: 5,
            prioritize_allowed: true,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            unsafe_patterns: ["temp", "tmp", "test", "localhost", "127.0.0.1", "example."]
                .into_iter()
                .map(String::from)
                .collect(),
            workers: 5,
            cache_max_age: None,
        }
    }
}

impl ResolveSettings {
    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = clamp_ratio(threshold);
        self
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = clamp_ratio(threshold);
        self
    }

    pub fn with_max_alternatives(mut self, max: usize) -> Self {
        self.max_alternatives = max.max(1);
        self
    }

    pub fn with_prioritize_allowed(mut self, enabled: bool) -> Self {
        self.prioritize_allowed = enabled;
        self
    }

    pub fn with_allow_list(mut self, entries: Vec<String>) -> Self {
        self.allow_list = normalize_list(entries);
        self
    }

    pub fn with_deny_list(mut self, entries: Vec<String>) -> Self {
        self.deny_list = normalize_list(entries);
        self
    }

    pub fn with_unsafe_patterns(mut self, patterns: Vec<String>) -> Self {
        self.unsafe_patterns = normalize_list(patterns);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cache_max_age(mut self, hours: Option<u64>) -> Self {
        self.cache_max_age = hours.map(|h| Duration::from_secs(h * 3600));
        self
    }

    /// Threshold that applies to the selected match mode.
    pub fn threshold(&self) -> f64 {
        match self.match_mode {
            MatchMode::Exact => 1.0,
            MatchMode::Similar => self.similarity_threshold,
            MatchMode::Fuzzy => self.fuzzy_threshold,
        }
    }

    pub fn is_unsafe_url(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.unsafe_patterns
            .iter()
            .any(|p| !p.is_empty() && url.contains(&p.to_lowercase()))
    }
}

fn clamp_ratio(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn normalize_list(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_clamp_invalid_values() {
        let probe = ProbeConfig::default()
            .with_workers(0)
            .with_request_timeout(0)
            .with_user_agent("  ");
        assert_eq!(probe.workers, 1);
        assert_eq!(probe.request_timeout, Duration::from_millis(1));
        assert!(probe.connect_timeout <= probe.request_timeout);
        assert_eq!(probe.user_agent, DEFAULT_USER_AGENT);

        let settings = ResolveSettings::default()
            .with_fuzzy_threshold(1.7)
            .with_similarity_threshold(-0.2)
            .with_max_alternatives(0)
            .with_workers(0);
        assert_eq!(settings.fuzzy_threshold, 1.0);
        assert_eq!(settings.similarity_threshold, 0.0);
        assert_eq!(settings.max_alternatives, 1);
        assert_eq!(settings.workers, 1);
    }

    #[test]
    fn threshold_follows_mode() {
        let settings = ResolveSettings::default();
        assert_eq!(settings.threshold(), 0.7);
        let settings = settings.with_match_mode(MatchMode::Similar);
        assert_eq!(settings.threshold(), 0.8);
    }

    #[test]
    fn unsafe_patterns_match_case_insensitively() {
        let settings = ResolveSettings::default();
        assert!(settings.is_unsafe_url("http://TEMP-cdn.net/live.m3u8"));
        assert!(settings.is_unsafe_url("http://127.0.0.1:8080/a"));
        assert!(!settings.is_unsafe_url("http://cdn.provider.tv/live.m3u8"));
    }
}
