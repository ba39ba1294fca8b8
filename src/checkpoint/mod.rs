//! Checkpoint and resume for working sets.
//!
//! A checkpoint captures the tracked entries and base versions of a
//! [`WorkingSet`] so offline edits survive a reload. Hooks, the endpoint and the
//! resolver are not part of a checkpoint; they stay with the working set a
//! checkpoint is restored into.

use crate::merge::{DomainObject, EntryStatus, WorkingSet, WorkingSetEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod error;

pub use error::CheckpointError;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serializable snapshot of a working set's change tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkingSetCheckpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: String,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Current versions and their status, by `"<type>:<id>"` key
    pub entries: BTreeMap<String, WorkingSetEntry>,

    /// Base versions; `None` for objects created locally
    pub bases: BTreeMap<String, Option<DomainObject>>,
}

impl WorkingSetCheckpoint {
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self)
            .map_err(CheckpointError::SerializationFailed)
    }

    /// Parse a checkpoint, rejecting unknown format versions.
    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self = serde_json::from_str(json)
            .map_err(CheckpointError::DeserializationFailed)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        Ok(checkpoint)
    }

    fn validate(&self) -> Result<(), CheckpointError> {
        for (key, entry) in &self.entries {
            let tracked = matches!(entry.status, EntryStatus::Modified | EntryStatus::Deleted);
            let has_base = matches!(self.bases.get(key), Some(Some(_)));
            if tracked && !has_base {
                return Err(CheckpointError::MissingBase {
                    key: key.clone(),
                    status: entry.status,
                });
            }
        }
        Ok(())
    }
}

impl WorkingSet {
    pub fn checkpoint(&self) -> WorkingSetCheckpoint {
        let (entries, bases) = self.state();
        WorkingSetCheckpoint {
            version: CHECKPOINT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            entries: entries.clone(),
            bases: bases.clone(),
        }
    }

    /// Replace the tracked state with a checkpoint's.
    pub fn restore(&mut self, checkpoint: WorkingSetCheckpoint) -> Result<(), CheckpointError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        checkpoint.validate()?;
        tracing::info!(
            checkpoint = %checkpoint.id,
            entries = checkpoint.entries.len(),
            "working set restored"
        );
        self.replace_state(checkpoint.entries, checkpoint.bases);
        Ok(())
    }
}
