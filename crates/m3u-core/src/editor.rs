use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::blacklist::Blacklist;
use crate::config::{ProbeConfig, ResolveSettings};
use crate::error::{EditorError, StoreError};
use crate::history::UndoManager;
use crate::loader::read_local;
use crate::playlist::{codec, Channel, Playlist, SortKey, UrlStatus};
use crate::probe::{
    probe_batch, probe_stream, BatchSummary, HttpProber, ProbeOutcome, ProbeReport, Prober,
};
use crate::resolver::{LinkResolver, Resolution};
use crate::sources::{Candidate, LinkSourceManager};

/// Totals for one [`PlaylistEditor::repair_broken`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub attempted: usize,
    pub repaired: usize,
    pub unresolved: usize,
    pub cancelled: bool,
}

/// Owns the open playlist and everything that edits it.
///
/// All mutations happen on the caller's task. Batch operations run their
/// network work in a worker pool and apply results here as they arrive, then
/// record a single undo entry for the whole batch.
pub struct PlaylistEditor {
    playlist: Playlist,
    path: Option<PathBuf>,
    history: UndoManager,
    blacklist: Blacklist,
    sources: LinkSourceManager,
    prober: Arc<dyn Prober>,
    probe_config: ProbeConfig,
    modified: bool,
}

impl PlaylistEditor {
    pub fn new(
        prober: Arc<dyn Prober>,
        probe_config: ProbeConfig,
        sources: LinkSourceManager,
    ) -> Self {
        let mut history = UndoManager::default();
        history.reset(&[], "Empty playlist");
        Self {
            playlist: Playlist::new(),
            path: None,
            history,
            blacklist: Blacklist::default(),
            sources,
            prober,
            probe_config,
            modified: false,
        }
    }

    /// Editor probing over HTTP with `probe_config`.
    pub fn with_http_prober(probe_config: ProbeConfig, sources: LinkSourceManager) -> Self {
        let prober = Arc::new(HttpProber::new(probe_config.clone()));
        Self::new(prober, probe_config, sources)
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_undo_depth(mut self, depth: usize) -> Self {
        self.history = UndoManager::new(depth);
        self.history.save(self.playlist.channels(), "Empty playlist");
        self
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether there are edits not yet written to disk.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn history(&self) -> &UndoManager {
        &self.history
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn blacklist_mut(&mut self) -> &mut Blacklist {
        &mut self.blacklist
    }

    pub fn sources(&self) -> &LinkSourceManager {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut LinkSourceManager {
        &mut self.sources
    }

    pub fn probe_config(&self) -> &ProbeConfig {
        &self.probe_config
    }

    /// Read and parse `path`, drop blacklisted channels and start a fresh
    /// history. Returns how many channels the blacklist removed.
    pub async fn load_playlist(&mut self, path: impl AsRef<Path>) -> Result<usize, EditorError> {
        let path = path.as_ref();
        let text = read_local(path).await?;
        let removed = self.load_text(&text);
        self.path = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            channels = self.playlist.len(),
            blacklisted = removed,
            "Loaded playlist"
        );
        Ok(removed)
    }

    /// Like [`load_playlist`](Self::load_playlist) for text already in memory.
    /// The editor is no longer associated with a file afterwards.
    pub fn load_text(&mut self, text: &str) -> usize {
        let (header, channels) = codec::parse(text);
        let (channels, removed) = self.blacklist.filter(channels);
        self.playlist = Playlist::from_parts(header, channels);
        self.path = None;
        self.history.reset(self.playlist.channels(), "Load playlist");
        self.modified = false;
        removed
    }

    pub async fn save_playlist(&mut self, path: impl AsRef<Path>) -> Result<(), EditorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(path, e))?;
        }
        tokio::fs::write(path, self.playlist.to_text())
            .await
            .map_err(|e| StoreError::io(path, e))?;
        self.path = Some(path.to_path_buf());
        self.modified = false;
        info!(path = %path.display(), channels = self.playlist.len(), "Saved playlist");
        Ok(())
    }

    /// Write back to the file the playlist was loaded from or last saved to.
    pub async fn save(&mut self) -> Result<(), EditorError> {
        let path = self.path.clone().ok_or(EditorError::NoPlaylist)?;
        self.save_playlist(path).await
    }

    pub fn to_text(&self) -> String {
        self.playlist.to_text()
    }

    /// Probe arbitrary URLs without touching the playlist. Reports stream
    /// back on the receiver; the handle yields the summary.
    pub fn probe_urls(
        &self,
        urls: Vec<String>,
        timeout: Duration,
        workers: usize,
        token: CancellationToken,
    ) -> (mpsc::UnboundedReceiver<ProbeReport>, JoinHandle<BatchSummary>) {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let config = self
            .probe_config
            .clone()
            .with_request_timeout(timeout_ms)
            .with_workers(workers);
        probe_stream(self.prober.clone(), urls, config, token)
    }

    /// Probe every distinct link in the playlist and record the results.
    ///
    /// `on_report` sees each report with the channel indices it applies to.
    /// Cancelled and deadline-stopped probes leave their channels untouched.
    pub async fn check_all<F>(
        &mut self,
        token: CancellationToken,
        mut on_report: F,
    ) -> BatchSummary
    where
        F: FnMut(&ProbeReport, &[usize]),
    {
        let plan = self.playlist.probe_plan();
        let urls: Vec<String> = plan.iter().map(|t| t.url.clone()).collect();
        let playlist = &mut self.playlist;
        let mut applied = 0usize;

        let summary = probe_batch(
            self.prober.as_ref(),
            &urls,
            &self.probe_config,
            token,
            |report| {
                let owners = &plan[report.index].owners;
                if report.outcome.is_conclusive() {
                    for &owner in owners {
                        playlist.mark_checked(
                            owner,
                            report.outcome.status,
                            report.outcome.checked_at,
                        );
                    }
                    applied += 1;
                }
                on_report(&report, owners);
            },
        )
        .await;

        if applied > 0 {
            self.record("Check links");
        }
        summary
    }

    /// Look for a reachable replacement for one channel and apply it.
    pub async fn resolve_link(
        &mut self,
        index: usize,
        settings: &ResolveSettings,
    ) -> Result<Resolution, EditorError> {
        let channel = self.channel(index)?.clone();
        self.sources.warm(settings, CancellationToken::new()).await;
        let snapshot = self.sources.snapshot();
        let resolver = LinkResolver::new(self.prober.clone(), settings.clone());

        let resolution = resolver.resolve(&channel, &snapshot).await;
        if let Resolution::Resolved { candidate, outcome } = &resolution {
            apply_replacement(&mut self.playlist, index, candidate, outcome);
            self.record(format!("Replace link of {}", channel.name));
        }
        Ok(resolution)
    }

    /// Resolve every broken or missing link concurrently.
    ///
    /// `on_result(index, resolution, completed, total)` runs after the
    /// replacement, if any, has been applied to channel `index`.
    pub async fn repair_broken<F>(
        &mut self,
        settings: &ResolveSettings,
        token: CancellationToken,
        mut on_result: F,
    ) -> RepairSummary
    where
        F: FnMut(usize, &Resolution, usize, usize),
    {
        let channels: Vec<(usize, Channel)> = self
            .playlist
            .broken_indices()
            .into_iter()
            .filter_map(|i| self.playlist.get(i).cloned().map(|c| (i, c)))
            .collect();
        let mut summary = RepairSummary {
            attempted: channels.len(),
            ..RepairSummary::default()
        };
        if channels.is_empty() {
            return summary;
        }

        self.sources.warm(settings, token.clone()).await;
        let snapshot = self.sources.snapshot();
        debug!(
            sources = snapshot.source_count(),
            donor_channels = snapshot.channel_count(),
            "Source snapshot ready"
        );
        let resolver = LinkResolver::new(self.prober.clone(), settings.clone());
        let playlist = &mut self.playlist;

        let pool = resolver
            .resolve_batch(channels, &snapshot, token, |index, resolution, completed, total| {
                match &resolution {
                    Resolution::Resolved { candidate, outcome } => {
                        apply_replacement(playlist, index, candidate, outcome);
                        summary.repaired += 1;
                    }
                    Resolution::NotResolved { .. } => summary.unresolved += 1,
                }
                on_result(index, &resolution, completed, total);
            })
            .await;
        summary.cancelled = pool.cancelled;

        if summary.repaired > 0 {
            self.record(format!("Repair {} links", summary.repaired));
        }
        info!(
            attempted = summary.attempted,
            repaired = summary.repaired,
            unresolved = summary.unresolved,
            cancelled = summary.cancelled,
            "Repair finished"
        );
        summary
    }

    /// Remove channels matching the current blacklist.
    pub fn apply_blacklist(&mut self) -> usize {
        let blacklist = &self.blacklist;
        let removed = self.playlist.retain(|c| !blacklist.matches(c));
        if removed > 0 {
            self.record(format!("Blacklist removed {removed} channels"));
        }
        removed
    }

    /// The state the playlist was loaded in cannot be undone.
    pub fn can_undo(&self) -> bool {
        self.history.undo_len() > 1
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        match self.history.undo() {
            Some(state) => {
                self.playlist.replace_channels(state.channels);
                self.modified = true;
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(state) => {
                self.playlist.replace_channels(state.channels);
                self.modified = true;
                true
            }
            None => false,
        }
    }

    /// Append a channel and return its index.
    pub fn add_channel(&mut self, channel: Channel) -> usize {
        let description = format!("Add {}", channel.name);
        self.playlist.push(channel);
        self.record(description);
        self.playlist.len() - 1
    }

    pub fn remove_channel(&mut self, index: usize) -> Result<Channel, EditorError> {
        let len = self.playlist.len();
        let removed = self
            .playlist
            .remove(index)
            .ok_or(EditorError::IndexOutOfRange { index, len })?;
        self.record(format!("Remove {}", removed.name));
        Ok(removed)
    }

    pub fn move_channel(&mut self, from: usize, to: usize) -> Result<(), EditorError> {
        let len = self.playlist.len();
        if !self.playlist.move_channel(from, to) {
            return Err(EditorError::IndexOutOfRange {
                index: from.max(to),
                len,
            });
        }
        self.record("Move channel");
        Ok(())
    }

    pub fn edit_channel<F>(&mut self, index: usize, f: F) -> Result<(), EditorError>
    where
        F: FnOnce(&mut Channel),
    {
        self.channel(index)?;
        self.playlist.update(index, f);
        let name = self.playlist.get(index).map(|c| c.name.clone()).unwrap_or_default();
        self.record(format!("Edit {name}"));
        Ok(())
    }

    /// Replace a link by hand. The old URL goes into the channel's
    /// replacement history.
    pub fn set_url(&mut self, index: usize, url: impl Into<String>) -> Result<(), EditorError> {
        self.channel(index)?;
        self.playlist.set_url(index, url, "Manual edit", "");
        self.record("Set link");
        Ok(())
    }

    pub fn sort(&mut self, key: SortKey) {
        self.playlist.sort_by(key);
        self.record(format!("Sort by {key:?}").to_lowercase());
    }

    fn channel(&self, index: usize) -> Result<&Channel, EditorError> {
        self.playlist.get(index).ok_or(EditorError::IndexOutOfRange {
            index,
            len: self.playlist.len(),
        })
    }

    fn record(&mut self, description: impl Into<String>) {
        self.history.save(self.playlist.channels(), description);
        self.modified = true;
    }
}

fn apply_replacement(
    playlist: &mut Playlist,
    index: usize,
    candidate: &Candidate,
    outcome: &ProbeOutcome,
) {
    playlist.set_url(
        index,
        candidate.url.as_str(),
        format!("Automatic repair ({})", candidate.channel_name),
        candidate.source_name.as_str(),
    );
    playlist.mark_checked(index, UrlStatus::Reachable, outcome.checked_at);
}
