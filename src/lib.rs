//! Flowstate: hierarchical view-state processes and optimistic merging
//!
//! Flowstate has two halves that share nothing but a transport error type:
//!
//! - a **process engine** running user-interface flows as named view states
//!   connected by transitions, with nested sub-processes, per-process undo/redo
//!   of versioned scope fields and one linear navigation history mirrored into
//!   the host's history
//! - a **working set** tracking edits to a graph of domain objects against their
//!   base versions, computing a minimal diff and driving a conflict-resolution
//!   round trip with a merge endpoint
//!
//! # Core Concepts
//!
//! - **Scope**: the observable model a process operates on; transitions mutate it
//!   in one batch that is either committed or rolled back
//! - **ViewState**: an immutable named state with a transition factory and a
//!   render function
//! - **ProcessEngine**: the explicit context owning every running process
//! - **WorkingSet**: base and current versions of tracked domain objects
//!
//! # Example
//!
//! ```rust
//! use flowstate::core::{FieldChange, ProcessHistory, Scope, VersioningStrategy};
//! use parking_lot::Mutex;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let scope = Scope::new();
//! let history = Arc::new(Mutex::new(ProcessHistory::new(VersioningStrategy::default())));
//! let recorder = Arc::clone(&history);
//! scope.observe(move |update| {
//!     recorder.lock().record_update(update);
//! });
//!
//! let batch = scope.begin_batch();
//! scope.set("v_count", json!(1));
//! scope.set("draft", json!("not versioned"));
//! batch.commit();
//!
//! assert_eq!(history.lock().pos(), 1);
//! ProcessHistory::navigate(&history, &scope, 0).unwrap();
//! assert_eq!(scope.get("v_count"), None);
//! ```

pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod merge;
pub mod process;
pub mod transport;

// Re-export commonly used types
pub use builder::{BuildError, ProcessModuleBuilder, TransitionBuilder, ViewStateBuilder};
pub use checkpoint::{CheckpointError, WorkingSetCheckpoint};
pub use core::{Scope, StateError, Transition, TransitionOutcome, ViewState};
pub use merge::{DomainObject, MergeError, MergeOperation, MergePlan, Schema, WorkingSet};
pub use process::{Collaborators, EngineConfig, ProcessEngine, ProcessError, ProcessModule};
pub use transport::TransportError;
