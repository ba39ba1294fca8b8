//! Build errors for view states, transitions, process modules and configuration.

use thiserror::Error;

/// Errors raised while constructing engine definitions (the invalid-argument family).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuildError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("View state '{0}' has no transition factory. Call .transitions(factory)")]
    MissingTransitions(String),

    #[error("View state '{0}' has no render function. Call .render(f)")]
    MissingRender(String),

    #[error("Transition needs a target state or an action. Call .to(state) or .action(action)")]
    MissingTarget,

    #[error("Process '{0}' declares no view states. Add one with .state(view_state)")]
    NoStates(String),

    #[error("Process '{process}' declares view state '{state}' more than once")]
    DuplicateState { process: String, state: String },

    #[error("Process '{0}' has no init function. Call .init(f) or .start_at(state)")]
    MissingInit(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
