use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, UrlStatus};
use super::codec;
use super::header::Header;

/// Explicit orderings; the playlist otherwise keeps file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Group,
    Status,
}

/// A distinct URL to probe and the channels that share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub url: String,
    pub owners: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub reachable: usize,
    pub unreachable: usize,
    pub unknown: usize,
    pub missing_url: usize,
}

/// The in-memory playlist: header plus channels in on-disk order.
///
/// Owns no I/O. Every mutation re-establishes the channel invariants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    pub header: Header,
    channels: Vec<Channel>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(header: Header, channels: Vec<Channel>) -> Self {
        Self { header, channels }
    }

    pub fn parse(text: &str) -> Self {
        let (header, channels) = codec::parse(text);
        Self { header, channels }
    }

    pub fn to_text(&self) -> String {
        codec::serialize(&self.header, &self.channels)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn push(&mut self, channel: Channel) {
        self.channels.push(normalized(channel));
    }

    /// Insert at `index`, clamped to the end of the list.
    pub fn insert(&mut self, index: usize, channel: Channel) {
        let index = index.min(self.channels.len());
        self.channels.insert(index, normalized(channel));
    }

    pub fn remove(&mut self, index: usize) -> Option<Channel> {
        (index < self.channels.len()).then(|| self.channels.remove(index))
    }

    pub fn move_channel(&mut self, from: usize, to: usize) -> bool {
        if from >= self.channels.len() || to >= self.channels.len() {
            return false;
        }
        let channel = self.channels.remove(from);
        self.channels.insert(to, channel);
        true
    }

    /// Mutate one channel in place.
    pub fn update<F>(&mut self, index: usize, f: F) -> bool
    where
        F: FnOnce(&mut Channel),
    {
        match self.channels.get_mut(index) {
            Some(channel) => {
                f(channel);
                let group = channel.group().to_string();
                channel.set_group(group);
                true
            }
            None => false,
        }
    }

    /// Swap the whole channel list, e.g. when restoring a snapshot.
    pub fn replace_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels.into_iter().map(normalized).collect();
    }

    pub fn retain<F>(&mut self, f: F) -> usize
    where
        F: FnMut(&Channel) -> bool,
    {
        let before = self.channels.len();
        self.channels.retain(f);
        before - self.channels.len()
    }

    pub fn set_url(
        &mut self,
        index: usize,
        new_url: impl Into<String>,
        reason: impl Into<String>,
        source: impl Into<String>,
    ) -> bool {
        match self.channels.get_mut(index) {
            Some(channel) => {
                channel.replace_url(new_url, reason, source);
                true
            }
            None => false,
        }
    }

    pub fn mark_checked(&mut self, index: usize, status: UrlStatus, at: DateTime<Utc>) -> bool {
        match self.channels.get_mut(index) {
            Some(channel) => {
                channel.mark_checked(status, at);
                true
            }
            None => false,
        }
    }

    /// Stable sort; ties keep their current relative order.
    pub fn sort_by(&mut self, key: SortKey) {
        match key {
            SortKey::Name => self
                .channels
                .sort_by_cached_key(|c| c.name.to_lowercase()),
            SortKey::Group => self
                .channels
                .sort_by_cached_key(|c| (c.group().to_lowercase(), c.name.to_lowercase())),
            SortKey::Status => self.channels.sort_by_key(status_rank),
        }
    }

    /// Group names in first-seen order.
    pub fn groups(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for channel in &self.channels {
            if !seen.contains(&channel.group()) {
                seen.push(channel.group());
            }
        }
        seen
    }

    pub fn find_by_name(&self, name: &str) -> Vec<usize> {
        let needle = name.trim().to_lowercase();
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name.to_lowercase().contains(&needle))
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct primary URLs and the channels sharing each one.
    ///
    /// Channels without a URL are left out; they are broken by definition.
    pub fn probe_plan(&self) -> Vec<ProbeTarget> {
        let mut targets: Vec<ProbeTarget> = Vec::new();
        let mut by_url: HashMap<&str, usize> = HashMap::new();
        for (idx, channel) in self.channels.iter().enumerate() {
            let url = channel.primary_url();
            if url.is_empty() {
                continue;
            }
            match by_url.get(url) {
                Some(&t) => targets[t].owners.push(idx),
                None => {
                    by_url.insert(url, targets.len());
                    targets.push(ProbeTarget {
                        url: url.to_string(),
                        owners: vec![idx],
                    });
                }
            }
        }
        targets
    }

    /// URLs used by more than one channel.
    pub fn duplicate_urls(&self) -> Vec<ProbeTarget> {
        self.probe_plan()
            .into_iter()
            .filter(|t| t.owners.len() > 1)
            .collect()
    }

    /// Channels with no link or a link that failed its last probe.
    pub fn broken_indices(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_broken())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for channel in &self.channels {
            if !channel.has_url() {
                counts.missing_url += 1;
                continue;
            }
            match channel.url_status {
                UrlStatus::Reachable => counts.reachable += 1,
                UrlStatus::Unreachable => counts.unreachable += 1,
                UrlStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

fn normalized(mut channel: Channel) -> Channel {
    let group = channel.group().to_string();
    channel.set_group(group);
    channel
}

fn status_rank(channel: &Channel) -> u8 {
    if !channel.has_url() {
        return 0;
    }
    match channel.url_status {
        UrlStatus::Unreachable => 1,
        UrlStatus::Unknown => 2,
        UrlStatus::Reachable => 3,
    }
}
