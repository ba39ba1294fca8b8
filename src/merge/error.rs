//! Working-set and merge errors.

use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MergeError {
    #[error("No base version registered for '{0}'")]
    NoBaseVersion(String),

    #[error("'{0}' is already tracked")]
    DuplicateIdentity(String),

    #[error("Invalid merge operation '{0}'")]
    InvalidOperation(String),

    #[error("Unknown domain type '{0}'")]
    UnknownType(String),

    #[error("Object has no identity: {0}")]
    MissingIdentity(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("No merge endpoint configured")]
    NoEndpoint,

    #[error("Network error: {0}")]
    Network(#[from] TransportError),
}
