//! Undo/redo snapshot history
//!
//! Whole-state snapshots, newest on top. Each edit pushes the state it
//! replaced; undo swaps the current state with the top of the undo stack.
//! The history also tracks when the last edit happened, which drives the
//! draft-save decision on the annotation.

use chrono::{DateTime, Utc};
use spanlab_common::time;

/// Default number of undo steps retained
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct UndoHistory<T> {
    undo: Vec<T>,
    redo: Vec<T>,
    limit: usize,
    last_edit: Option<DateTime<Utc>>,
}

impl<T: Clone> UndoHistory<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.max(1),
            last_edit: None,
        }
    }

    /// Forget all steps; the current state becomes the new baseline
    pub fn reset(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.last_edit = None;
    }

    /// Record that `previous` was replaced by an edit
    pub fn record(&mut self, previous: T) {
        self.record_at(previous, time::now());
    }

    pub fn record_at(&mut self, previous: T, at: DateTime<Utc>) {
        self.undo.push(previous);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
        self.redo.clear();
        self.last_edit = Some(at);
    }

    /// Step back; returns the state to restore
    pub fn undo(&mut self, current: T) -> Option<T> {
        let previous = self.undo.pop()?;
        self.redo.push(current);
        self.last_edit = Some(time::now());
        Some(previous)
    }

    /// Step forward again; returns the state to restore
    pub fn redo(&mut self, current: T) -> Option<T> {
        let next = self.redo.pop()?;
        self.undo.push(current);
        self.last_edit = Some(time::now());
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Any edit (including undo/redo) since the last reset
    pub fn has_changes(&self) -> bool {
        self.last_edit.is_some()
    }

    pub fn last_edit(&self) -> Option<DateTime<Utc>> {
        self.last_edit
    }
}

impl<T: Clone> Default for UndoHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo_cycle() {
        let mut history = UndoHistory::default();
        let mut state = vec![1];

        history.record(state.clone());
        state.push(2);
        history.record(state.clone());
        state.push(3);

        state = history.undo(state).unwrap();
        assert_eq!(state, vec![1, 2]);
        state = history.undo(state).unwrap();
        assert_eq!(state, vec![1]);
        assert!(history.undo(state.clone()).is_none());

        state = history.redo(state).unwrap();
        assert_eq!(state, vec![1, 2]);
        assert!(history.can_redo());
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut history = UndoHistory::default();
        history.record(0);
        let restored = history.undo(1).unwrap();
        assert_eq!(restored, 0);
        assert!(history.can_redo());

        history.record(restored);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = UndoHistory::new(2);
        history.record(1);
        history.record(2);
        history.record(3);

        assert_eq!(history.undo(4), Some(3));
        assert_eq!(history.undo(3), Some(2));
        assert_eq!(history.undo(2), None);
    }

    #[test]
    fn test_reset_clears_changes() {
        let mut history: UndoHistory<u8> = UndoHistory::default();
        assert!(!history.has_changes());
        history.record(1);
        assert!(history.has_changes());
        history.reset();
        assert!(!history.has_changes());
        assert!(!history.can_undo());
    }
}
