//! Working-set checkpoint errors.

use crate::merge::EntryStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The tracked entries or bases could not be written as JSON.
    #[error("Cannot encode working-set checkpoint: {0}")]
    SerializationFailed(#[source] serde_json::Error),

    /// The document is not a working-set checkpoint.
    #[error("Cannot decode working-set checkpoint: {0}")]
    DeserializationFailed(#[source] serde_json::Error),

    #[error("Unsupported checkpoint version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Only NEW and REGISTERED entries may lack a base version; a restored
    /// MODIFIED or DELETED entry would have nothing to diff against.
    #[error("Checkpoint entry '{key}' is {status:?} without a base version")]
    MissingBase { key: String, status: EntryStatus },
}
