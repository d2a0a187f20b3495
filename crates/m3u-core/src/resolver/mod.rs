pub mod matching;

pub use matching::MatchMode;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ResolveSettings;
use crate::playlist::Channel;
use crate::pool::{PoolSummary, WorkerPool};
use crate::probe::{ProbeOutcome, Prober};
use crate::sources::{Candidate, SourceSnapshot, Trust};

/// Result of looking for a replacement link for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        candidate: Candidate,
        /// The probe that found the replacement reachable.
        outcome: ProbeOutcome,
    },
    NotResolved {
        reason: String,
        /// Candidates probed before giving up.
        tried: usize,
    },
}

impl Resolution {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Resolved { candidate, .. } => Some(&candidate.url),
            Self::NotResolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    fn not_resolved(reason: impl Into<String>, tried: usize) -> Self {
        Self::NotResolved {
            reason: reason.into(),
            tried,
        }
    }
}

/// Finds a reachable replacement URL for a broken or missing channel link.
#[derive(Clone)]
pub struct LinkResolver {
    prober: Arc<dyn Prober>,
    settings: ResolveSettings,
}

impl LinkResolver {
    pub fn new(prober: Arc<dyn Prober>, settings: ResolveSettings) -> Self {
        Self { prober, settings }
    }

    pub fn settings(&self) -> &ResolveSettings {
        &self.settings
    }

    /// Candidates in the order they will be probed, which is the ranked
    /// order of the snapshot search.
    ///
    /// Denied candidates and the channel's own links are dropped, as are
    /// unsafe URLs. With `prioritize_allowed` on, allow-listed candidates are
    /// exempt from the unsafe filter and are probed as a first pass.
    pub fn candidates_for(&self, channel: &Channel, snapshot: &SourceSnapshot) -> Vec<Candidate> {
        let own: Vec<&str> = channel
            .url
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let allowed_first = self.settings.prioritize_allowed;
        let (allowed, rest): (Vec<Candidate>, Vec<Candidate>) = snapshot
            .search(&channel.name, &self.settings)
            .into_iter()
            .filter(|c| c.trust != Trust::Denied)
            .filter(|c| !own.contains(&c.url.trim()))
            .partition(|c| allowed_first && c.trust == Trust::Allowed);
        allowed
            .into_iter()
            .chain(rest.into_iter().filter(|c| !self.settings.is_unsafe_url(&c.url)))
            .collect()
    }

    pub async fn resolve(&self, channel: &Channel, snapshot: &SourceSnapshot) -> Resolution {
        self.resolve_with(channel, snapshot, &CancellationToken::new())
            .await
    }

    /// Probe candidates one at a time; the first reachable one wins.
    pub async fn resolve_with(
        &self,
        channel: &Channel,
        snapshot: &SourceSnapshot,
        token: &CancellationToken,
    ) -> Resolution {
        let candidates = self.candidates_for(channel, snapshot);
        if candidates.is_empty() {
            debug!(channel = %channel.name, "No replacement candidates");
            return Resolution::not_resolved("no matching candidates", 0);
        }

        let mut tried = 0;
        for candidate in candidates {
            if token.is_cancelled() {
                return Resolution::not_resolved("cancelled", tried);
            }
            tried += 1;
            let outcome = self.prober.probe(&candidate.url).await;
            debug!(
                channel = %channel.name,
                url = %candidate.url,
                source = %candidate.source_name,
                status = %outcome.status,
                "Probed replacement candidate"
            );
            if outcome.is_reachable() {
                return Resolution::Resolved { candidate, outcome };
            }
        }
        Resolution::not_resolved("no reachable candidate", tried)
    }

    /// Resolve many channels concurrently, at most `settings.workers` at a
    /// time. `on_result(index, resolution, completed, total)` runs on the
    /// caller's task, where `index` is the caller-supplied key.
    pub async fn resolve_batch<C>(
        &self,
        channels: Vec<(usize, Channel)>,
        snapshot: &SourceSnapshot,
        token: CancellationToken,
        mut on_result: C,
    ) -> PoolSummary
    where
        C: FnMut(usize, Resolution, usize, usize),
    {
        let keys: Vec<usize> = channels.iter().map(|(k, _)| *k).collect();
        info!(channels = channels.len(), workers = self.settings.workers, "Resolving broken links");
        let pool = WorkerPool::new(self.settings.workers, token.clone());
        pool.run(
            channels,
            |_, (_, channel)| {
                let token = token.clone();
                async move { self.resolve_with(&channel, snapshot, &token).await }
            },
            |slot, resolution, completed, total| {
                on_result(keys[slot], resolution, completed, total)
            },
        )
        .await
    }
}
