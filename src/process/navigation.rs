//! Linear, cross-process navigation history.

use crate::core::ProcessId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One recorded navigation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationEntry {
    pub id: Uuid,
    pub process_id: ProcessId,
    pub state: String,
    /// Process history cursor at the time of the step.
    pub history_pos: usize,
    pub created_at: DateTime<Utc>,
}

impl NavigationEntry {
    pub fn new(process_id: ProcessId, state: impl Into<String>, history_pos: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_id,
            state: state.into(),
            history_pos,
            created_at: Utc::now(),
        }
    }
}

/// Opaque state pushed to the host history and echoed back on POP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    pub navigation_id: Uuid,
}

/// Bounded navigation history with a cursor.
#[derive(Clone, Debug)]
pub struct NavigationHistory {
    entries: Vec<NavigationEntry>,
    cursor: Option<usize>,
    max_len: usize,
}

impl NavigationHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            max_len: max_len.max(1),
        }
    }

    /// Append an entry after the cursor, dropping any forward entries.
    pub fn push(&mut self, entry: NavigationEntry) -> usize {
        self.truncate_forward();
        self.entries.push(entry);
        let index = self.entries.len() - 1;
        self.cursor = Some(index);
        index
    }

    /// Drop every entry after the cursor.
    pub(crate) fn truncate_forward(&mut self) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
    }

    /// Drop the oldest entries beyond the configured maximum.
    pub fn prune(&mut self) -> Vec<NavigationEntry> {
        if self.entries.len() <= self.max_len {
            return Vec::new();
        }
        let excess = self.entries.len() - self.max_len;
        let dropped: Vec<_> = self.entries.drain(..excess).collect();
        self.cursor = self.cursor.map(|cursor| cursor.saturating_sub(excess));
        dropped
    }

    pub fn find(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&NavigationEntry> {
        self.entries.get(index)
    }

    pub fn current(&self) -> Option<&NavigationEntry> {
        self.cursor.and_then(|cursor| self.entries.get(cursor))
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, index: usize) {
        if index < self.entries.len() {
            self.cursor = Some(index);
        }
    }

    pub fn entries(&self) -> &[NavigationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Every process referenced by an entry, plus its ancestors.
    pub fn reachable<F>(&self, parent_of: F) -> HashSet<ProcessId>
    where
        F: Fn(ProcessId) -> Option<ProcessId>,
    {
        let mut reachable = HashSet::new();
        for entry in &self.entries {
            let mut next = Some(entry.process_id);
            while let Some(id) = next {
                if !reachable.insert(id) {
                    break;
                }
                next = parent_of(id);
            }
        }
        reachable
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}
