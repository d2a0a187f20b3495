use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use super::{CacheEntry, CachedChannel};
use crate::config::ResolveSettings;
use crate::resolver::MatchMode;

/// Standing of a candidate under the allow/deny lists.
///
/// Declaration order is ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trust {
    Allowed,
    Neutral,
    Denied,
}

impl Trust {
    /// Deny entries win over allow entries. Entries match the source name or
    /// the URL host, case-insensitively, as substrings.
    pub fn classify(settings: &ResolveSettings, source_name: &str, url: &str) -> Self {
        let source = source_name.to_lowercase();
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();
        let hit = |entry: &String| {
            let entry = entry.trim().to_lowercase();
            !entry.is_empty() && (source.contains(&entry) || host.contains(&entry))
        };
        if settings.deny_list.iter().any(hit) {
            Trust::Denied
        } else if settings.allow_list.iter().any(hit) {
            Trust::Allowed
        } else {
            Trust::Neutral
        }
    }
}

impl fmt::Display for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Neutral => write!(f, "neutral"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// A possible replacement link found in a donor source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub channel_name: String,
    pub url: String,
    pub source_name: String,
    pub priority: i32,
    pub trust: Trust,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct SnapshotSource {
    name: String,
    priority: i32,
    entry: Arc<CacheEntry>,
}

/// Immutable view of every enabled source's cache, cheap to clone and safe to
/// search from many workers at once.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    sources: Arc<Vec<SnapshotSource>>,
}

impl SourceSnapshot {
    pub(crate) fn new(sources: impl IntoIterator<Item = (String, i32, Arc<CacheEntry>)>) -> Self {
        let sources = sources
            .into_iter()
            .map(|(name, priority, entry)| SnapshotSource {
                name,
                priority,
                entry,
            })
            .collect();
        Self {
            sources: Arc::new(sources),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn channel_count(&self) -> usize {
        self.sources.iter().map(|s| s.entry.channels.len()).sum()
    }

    /// Candidates for `channel_name` across all sources, ranked allowed
    /// before neutral before denied, then by descending source priority, then
    /// by descending match score. Each URL appears once; the list is cut at
    /// `settings.max_alternatives`.
    pub fn search(&self, channel_name: &str, settings: &ResolveSettings) -> Vec<Candidate> {
        if channel_name.trim().is_empty() {
            return Vec::new();
        }
        let threshold = settings.threshold();
        let mut candidates = Vec::new();
        for source in self.sources.iter() {
            let mut push = |donor: &CachedChannel, score: f64| {
                if donor.url.trim().is_empty() {
                    return;
                }
                candidates.push(Candidate {
                    channel_name: donor.name.clone(),
                    url: donor.url.clone(),
                    source_name: source.name.clone(),
                    priority: source.priority,
                    trust: Trust::classify(settings, &source.name, &donor.url),
                    score,
                });
            };
            // exact names come straight from the cache index
            if settings.match_mode == MatchMode::Exact {
                source.entry.named(channel_name).for_each(|d| push(d, 1.0));
                continue;
            }
            for donor in &source.entry.channels {
                if let Some(score) = settings
                    .match_mode
                    .score(channel_name, &donor.name, threshold)
                {
                    push(donor, score);
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.trust
                .cmp(&b.trust)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| b.score.total_cmp(&a.score))
        });

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.url.clone()));
        candidates.truncate(settings.max_alternatives);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::Channel;
    use chrono::Utc;

    fn entry(name: &str, channels: &[(&str, &str)]) -> Arc<CacheEntry> {
        let channels: Vec<Channel> = channels
            .iter()
            .map(|(n, u)| Channel::new(*n, *u))
            .collect();
        Arc::new(CacheEntry::build(name, &channels, Utc::now()))
    }

    fn snapshot() -> SourceSnapshot {
        SourceSnapshot::new(vec![
            (
                "low".to_string(),
                5,
                entry("low", &[("ESPN", "http://low.tv/espn"), ("CNN", "http://low.tv/cnn")]),
            ),
            (
                "premium".to_string(),
                10,
                entry("premium", &[("ESPN HD", "http://premium.tv/espn")]),
            ),
        ])
    }

    #[test]
    fn allow_listed_high_priority_ranks_first() {
        let settings = ResolveSettings::default().with_allow_list(vec!["premium".into()]);
        let found = snapshot().search("ESPN", &settings);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].url, "http://premium.tv/espn");
        assert_eq!(found[0].trust, Trust::Allowed);
        assert_eq!(found[1].url, "http://low.tv/espn");
    }

    #[test]
    fn priority_orders_equally_trusted() {
        let settings = ResolveSettings::default();
        let found = snapshot().search("ESPN", &settings);
        assert_eq!(found[0].source_name, "premium");
    }

    #[test]
    fn denied_sinks_to_the_bottom_and_host_matches() {
        let settings = ResolveSettings::default().with_deny_list(vec!["premium.tv".into()]);
        let found = snapshot().search("ESPN", &settings);
        assert_eq!(found[0].source_name, "low");
        assert_eq!(found[1].trust, Trust::Denied);
    }

    #[test]
    fn exact_mode_and_truncation() {
        let settings = ResolveSettings::default()
            .with_match_mode(MatchMode::Exact)
            .with_max_alternatives(1);
        let found = snapshot().search("espn", &settings);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].channel_name, "ESPN");
        assert!(snapshot().search("  ", &settings).is_empty());
    }
}
