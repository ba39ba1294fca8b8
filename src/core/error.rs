//! Errors raised by the core state types.

use thiserror::Error;

/// Structural errors of states, transitions and history positions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    #[error("state '{state}' does not exist in process '{process}'")]
    InvalidTargetState { state: String, process: String },

    #[error("history position {requested} is out of bounds (0..={end})")]
    OutOfBounds { requested: usize, end: usize },
}
