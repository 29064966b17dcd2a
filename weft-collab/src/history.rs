//! Per-client undo/redo history.
//!
//! Both stacks hold *inverse* change deltas. Rapid keystrokes merge into
//! the top undo entry inside a configurable window, and remote updates
//! transform every stored entry so an undo stays meaningful after peers
//! have edited around it.

use std::time::{Duration, Instant};

use weft_delta::Delta;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Local changes closer together than this merge into one undo step.
    pub merge_threshold: Duration,
    /// Oldest entries are dropped past this depth.
    pub max_len: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            merge_threshold: Duration::from_secs(1),
            max_len: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    inverse: Delta,
    recorded_at: Instant,
}

/// Undo/redo stacks of inverse deltas. Most recent entry last.
#[derive(Debug)]
pub struct LocalHistory {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    config: HistoryConfig,
    last_recorded: Option<Instant>,
}

impl LocalHistory {
    pub fn new(config: HistoryConfig) -> Self {
        LocalHistory {
            undo: Vec::new(),
            redo: Vec::new(),
            config,
            last_recorded: None,
        }
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Record a local change made against `base_before`. Clears the redo
    /// stack.
    pub fn record(&mut self, change: &Delta, base_before: &Delta, now: Instant) {
        let inverse = change.invert(base_before);
        let merge = self
            .last_recorded
            .is_some_and(|last| now.duration_since(last) <= self.config.merge_threshold)
            && !self.undo.is_empty();
        if merge {
            // Undoing both applies the newer inverse first, so it composes
            // ahead of the existing top.
            let top = self.undo.last_mut().expect("merge requires an entry");
            top.inverse = inverse.compose(&top.inverse);
        } else {
            self.undo.push(HistoryEntry {
                inverse,
                recorded_at: now,
            });
            self.last_recorded = Some(now);
        }
        if self.undo.len() > self.config.max_len {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    /// Pop the top undo entry. Returns the change to apply to `current`;
    /// the counter-inverse lands on the redo stack.
    pub fn undo(&mut self, current: &Delta) -> Option<Delta> {
        let entry = self.undo.pop()?;
        let counter = entry.inverse.invert(current);
        self.redo.push(HistoryEntry {
            inverse: counter,
            recorded_at: entry.recorded_at,
        });
        // A keystroke right after an undo starts a fresh entry.
        self.last_recorded = None;
        Some(entry.inverse)
    }

    /// Pop the top redo entry. Returns the change to apply to `current`;
    /// the counter-inverse lands back on the undo stack.
    pub fn redo(&mut self, current: &Delta) -> Option<Delta> {
        let entry = self.redo.pop()?;
        let counter = entry.inverse.invert(current);
        self.undo.push(HistoryEntry {
            inverse: counter,
            recorded_at: entry.recorded_at,
        });
        self.last_recorded = None;
        Some(entry.inverse)
    }

    /// Rebase both stacks over a remote change. Entries whose transform
    /// collapses to nothing are dropped.
    pub fn transform_remote(&mut self, remote: &Delta) {
        transform_stack(&mut self.undo, remote);
        transform_stack(&mut self.redo, remote);
    }
}

/// Walk the stack newest-first, carrying the remote delta through each
/// entry so older entries see the remote as it looks after the newer local
/// changes are unwound.
fn transform_stack(stack: &mut Vec<HistoryEntry>, remote: &Delta) {
    let mut remote = remote.clone();
    let mut index = stack.len();
    while index > 0 {
        index -= 1;
        let entry = stack[index].inverse.clone();
        let transformed = remote.transform(&entry, true);
        remote = entry.transform(&remote, false);
        if transformed.is_empty() {
            stack.remove(index);
        } else {
            stack[index].inverse = transformed;
        }
    }
}
