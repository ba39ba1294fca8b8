//! Core process types.
//!
//! This module contains the leaf types of the process engine:
//! - `Scope`: the observable model a process operates on
//! - `VersioningStrategy` and `ProcessHistory`: undo/redo of versioned fields
//! - `ViewState` and `TransitionMap`: immutable state descriptors
//! - `Transition`: the value object handed to transition actions
//!
//! Nothing in here knows about the process stack or the host; that lives in
//! [`crate::process`].

mod error;
mod history;
mod scope;
mod transition;
mod versioning;
mod view_state;

pub use error::StateError;
pub use history::{ProcessHistory, RecordedChange};
pub use scope::{FieldChange, ObserverId, Scope, ScopeBatch, ScopeUpdate};
pub use transition::{ProcessId, ProcessInfo, Transition, TransitionOutcome, START_TRANSITION};
pub use versioning::{VersioningStrategy, DEFAULT_VERSIONING_PREFIX};
pub use view_state::{
    Action, AsyncAction, Confirmation, RenderFn, RestoreHook, SyncAction, TransitionEntry,
    TransitionFactory, TransitionMap, ViewState,
};
