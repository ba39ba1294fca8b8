//! Process engine errors.

use crate::builder::BuildError;
use crate::core::{ProcessId, StateError};
use crate::transport::TransportError;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by the process engine.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] BuildError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Unknown transition '{transition}' in state '{state}' of process '{process}'")]
    UnknownTransition {
        process: String,
        state: String,
        transition: String,
    },

    #[error("Process {0} is not initialized")]
    NotInitialized(ProcessId),

    #[error("Unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("Process {0} is not a sub-process")]
    NotASubProcess(ProcessId),

    #[error("Process {0} has already ended")]
    AlreadyEnded(ProcessId),

    #[error("Process {0} is paused behind another process")]
    NotActive(ProcessId),

    #[error("Process '{0}' did not resolve a start state")]
    NoStartState(String),

    #[error("No injection found for query '{key}' of process '{process}'")]
    InjectionNotFound { process: String, key: String },

    #[error("Transition '{transition}' failed: {message}")]
    ActionFailed { transition: String, message: String },

    #[error("Cannot import process '{name}': {message}")]
    Import { name: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("Sub-process aborted: {reason}")]
    SubProcessAborted { reason: Value },

    #[error("Sub-process ended without a result")]
    SubProcessDropped,
}

impl ProcessError {
    /// Convert a failed action body, keeping structural errors raised inside it.
    pub(crate) fn from_action(transition: &str, error: anyhow::Error) -> Self {
        match error.downcast::<StateError>() {
            Ok(state) => ProcessError::State(state),
            Err(error) => ProcessError::ActionFailed {
                transition: transition.to_string(),
                message: format!("{error:#}"),
            },
        }
    }
}
