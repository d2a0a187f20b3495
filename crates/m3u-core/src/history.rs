use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::playlist::Channel;

pub const DEFAULT_UNDO_DEPTH: usize = 50;

/// An immutable deep copy of the channel list.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoState {
    pub id: String,
    pub channels: Vec<Channel>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl UndoState {
    pub fn new(channels: &[Channel], description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channels: channels.to_vec(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    /// Returned by [`UndoManager::undo`] once the oldest snapshot is popped.
    pub fn empty() -> Self {
        Self::new(&[], "Empty playlist")
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Bounded linear undo/redo history of full snapshots.
///
/// The top of the undo stack is the current state. Saving clears the redo
/// stack; pushing past capacity evicts the oldest snapshot.
#[derive(Debug, Clone)]
pub struct UndoManager {
    undo: VecDeque<UndoState>,
    redo: Vec<UndoState>,
    capacity: usize,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}

impl UndoManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            undo: VecDeque::with_capacity(capacity),
            redo: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn save(&mut self, channels: &[Channel], description: impl Into<String>) {
        if self.undo.len() >= self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(UndoState::new(channels, description));
        self.redo.clear();
    }

    /// Step back one snapshot. Returns the snapshot that is now current, the
    /// empty sentinel when the last snapshot was popped, or `None` when there
    /// is nothing to undo.
    pub fn undo(&mut self) -> Option<UndoState> {
        let current = self.undo.pop_back()?;
        self.redo.push(current);
        Some(self.undo.back().cloned().unwrap_or_else(UndoState::empty))
    }

    pub fn redo(&mut self) -> Option<UndoState> {
        let state = self.redo.pop()?;
        if self.undo.len() >= self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(state.clone());
        Some(state)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Current snapshot, if any.
    pub fn peek(&self) -> Option<&UndoState> {
        self.undo.back()
    }

    /// Descriptions, newest first.
    pub fn descriptions(&self) -> Vec<&str> {
        self.undo.iter().rev().map(|s| s.description.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Forget everything and start from `channels`.
    pub fn reset(&mut self, channels: &[Channel], description: impl Into<String>) {
        self.clear();
        self.save(channels, description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(names: &[&str]) -> Vec<Channel> {
        names
            .iter()
            .map(|n| Channel::new(*n, format!("http://x/{}", n)))
            .collect()
    }

    #[test]
    fn undo_then_redo() {
        let mut mgr = UndoManager::default();
        let s1 = state(&["a"]);
        let s2 = state(&["a", "b"]);
        mgr.save(&s1, "one");
        mgr.save(&s2, "two");

        let back = mgr.undo().unwrap();
        assert_eq!(back.channels, s1);
        assert_eq!(back.description, "one");
        assert!(mgr.can_redo());

        let fwd = mgr.redo().unwrap();
        assert_eq!(fwd.channels, s2);
        assert!(!mgr.can_redo());
    }

    #[test]
    fn save_after_undo_clears_redo() {
        let mut mgr = UndoManager::default();
        mgr.save(&state(&["a"]), "one");
        mgr.save(&state(&["b"]), "two");
        mgr.undo();
        mgr.save(&state(&["c"]), "three");
        assert!(!mgr.can_redo());
        assert!(mgr.redo().is_none());
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut mgr = UndoManager::new(50);
        for i in 0..51 {
            mgr.save(&state(&[&i.to_string()]), format!("edit {}", i));
        }
        assert_eq!(mgr.undo_len(), 50);
        let descriptions = mgr.descriptions();
        assert_eq!(descriptions.first(), Some(&"edit 50"));
        assert_eq!(descriptions.last(), Some(&"edit 1"));
    }

    #[test]
    fn snapshots_are_deep_copies() {
        let mut mgr = UndoManager::default();
        let mut live = state(&["a"]);
        mgr.save(&live, "one");
        live[0].name = "mutated".into();
        live[0].replace_url("http://other", "edit", "");
        assert_eq!(mgr.peek().unwrap().channels[0].name, "a");
        assert_eq!(mgr.peek().unwrap().channels[0].url, "http://x/a");
    }

    #[test]
    fn undo_past_first_returns_sentinel() {
        let mut mgr = UndoManager::default();
        assert!(mgr.undo().is_none());
        mgr.save(&state(&["a"]), "one");
        let sentinel = mgr.undo().unwrap();
        assert!(sentinel.is_empty());
        assert!(!mgr.can_undo());
        assert_eq!(mgr.redo().unwrap().channels.len(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut mgr = UndoManager::new(0);
        mgr.save(&state(&["a"]), "one");
        mgr.save(&state(&["b"]), "two");
        assert_eq!(mgr.capacity(), 1);
        assert_eq!(mgr.undo_len(), 1);
    }
}
