//! Failures reported by network-bound collaborators.

use serde_json::Value;
use thiserror::Error;

/// Error returned by injection fetchers and merge endpoints.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The request never produced a usable response.
    #[error("Request failed: {0}")]
    Failed(String),

    /// The server answered with an `{ error }` payload.
    #[error("Server rejected request: {0}")]
    Rejected(Value),
}
