//! Per-process change history of versioned scope fields.
//!
//! The history is a linear list of recorded field changes with a write cursor.
//! Recording after an undo truncates the stale forward entries, the same way a
//! fresh edit overwrites redo history in an editor. Navigation replays (`new`
//! values, forward) or un-replays (`old` values, backward) the changes between
//! the cursor and the requested position.

use super::error::StateError;
use super::scope::{FieldChange, Scope, ScopeUpdate};
use super::versioning::VersioningStrategy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded mutation of a versioned field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedChange {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl From<&FieldChange> for RecordedChange {
    fn from(change: &FieldChange) -> Self {
        Self {
            name: change.name.clone(),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
        }
    }
}

/// Ordered field-change history with undo/redo by position.
///
/// Invariant: `0 <= pos <= changes_end <= changes.len()`.
///
/// # Example
///
/// ```rust
/// use flowstate::core::{FieldChange, ProcessHistory, VersioningStrategy};
/// use serde_json::json;
///
/// let mut history = ProcessHistory::new(VersioningStrategy::prefixed("v_"));
/// history.record(&FieldChange {
///     name: "v_count".to_string(),
///     old_value: Some(json!(0)),
///     new_value: Some(json!(1)),
/// });
/// assert_eq!(history.pos(), 1);
///
/// let undo = history.begin_replay(0).unwrap();
/// history.end_replay();
/// assert_eq!(undo, vec![("v_count".to_string(), Some(json!(0)))]);
/// ```
#[derive(Clone, Debug)]
pub struct ProcessHistory {
    changes: Vec<RecordedChange>,
    pos: usize,
    changes_end: usize,
    recording: bool,
    strategy: VersioningStrategy,
}

impl Default for ProcessHistory {
    fn default() -> Self {
        Self::new(VersioningStrategy::default())
    }
}

impl ProcessHistory {
    pub fn new(strategy: VersioningStrategy) -> Self {
        Self {
            changes: Vec::new(),
            pos: 0,
            changes_end: 0,
            recording: true,
            strategy,
        }
    }

    /// Current write cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// High-water mark: the furthest position a redo can reach.
    pub fn changes_end(&self) -> usize {
        self.changes_end
    }

    pub fn changes(&self) -> &[RecordedChange] {
        &self.changes
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Record a single change. Returns `false` when the change was ignored
    /// because recording is suspended or the field is not versioned.
    pub fn record(&mut self, change: &FieldChange) -> bool {
        if !self.recording || !self.strategy.check(&change.name) {
            return false;
        }
        self.changes.truncate(self.pos);
        self.changes.push(RecordedChange::from(change));
        self.pos += 1;
        self.changes_end = self.pos;
        true
    }

    /// Record every versioned change of a committed scope update.
    pub fn record_update(&mut self, update: &ScopeUpdate) -> usize {
        update
            .changes
            .iter()
            .filter(|change| self.record(change))
            .count()
    }

    /// Move the cursor to `target` and return the field writes that bring the
    /// scope to that position. Recording stays suspended until
    /// [`end_replay`](Self::end_replay).
    pub fn begin_replay(
        &mut self,
        target: usize,
    ) -> Result<Vec<(String, Option<Value>)>, StateError> {
        if target > self.changes_end {
            return Err(StateError::OutOfBounds {
                requested: target,
                end: self.changes_end,
            });
        }

        let writes = if target < self.pos {
            self.changes[target..self.pos]
                .iter()
                .rev()
                .map(|c| (c.name.clone(), c.old_value.clone()))
                .collect()
        } else {
            self.changes[self.pos..target]
                .iter()
                .map(|c| (c.name.clone(), c.new_value.clone()))
                .collect()
        };

        self.pos = target;
        self.recording = false;
        Ok(writes)
    }

    pub fn end_replay(&mut self) {
        self.recording = true;
    }

    /// Replay a shared history against `scope` up to `target`.
    ///
    /// The history lock is released while the scope applies the writes, so the
    /// history's own scope observer can run (and ignore the replayed update).
    pub fn navigate(history: &Mutex<Self>, scope: &Scope, target: usize) -> Result<(), StateError> {
        let writes = history.lock().begin_replay(target)?;
        scope.apply(writes);
        history.lock().end_replay();
        Ok(())
    }
}
