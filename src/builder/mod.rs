//! Builder API for ergonomic process construction.
//!
//! This module provides fluent builders and a macro for creating view states,
//! transition entries and process modules with minimal boilerplate. All builders
//! validate in `build()` and report problems as [`BuildError`].

pub mod error;
pub mod macros;
pub mod process;
pub mod transition;
pub mod view_state;

pub use error::BuildError;
pub use process::ProcessModuleBuilder;
pub use transition::TransitionBuilder;
pub use view_state::ViewStateBuilder;

use crate::core::TransitionEntry;

/// Conversion used by [`transition_map!`](crate::transition_map).
pub trait IntoTransitionEntry {
    fn into_entry(self) -> TransitionEntry;
}

impl IntoTransitionEntry for TransitionEntry {
    fn into_entry(self) -> TransitionEntry {
        self
    }
}

impl IntoTransitionEntry for &str {
    fn into_entry(self) -> TransitionEntry {
        TransitionEntry::to(self)
    }
}

impl IntoTransitionEntry for String {
    fn into_entry(self) -> TransitionEntry {
        TransitionEntry::to(self)
    }
}

/// Create an entry that moves to `target` without an action.
///
/// # Example
///
/// ```
/// use flowstate::builder::goto;
///
/// let entry = goto("detail");
/// assert_eq!(entry.target(), Some("detail"));
/// ```
pub fn goto(target: impl Into<String>) -> TransitionEntry {
    TransitionEntry::to(target)
}

/// Create an entry that moves to `target` after the user confirms `message`.
pub fn confirmed(target: impl Into<String>, message: impl Into<String>) -> TransitionEntry {
    let message = message.into();
    TransitionEntry {
        confirmation: Some(std::sync::Arc::new(move |_: &serde_json::Value| {
            Some(message.clone())
        })),
        ..TransitionEntry::to(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn goto_builds_plain_entry() {
        let entry = goto("b");
        assert_eq!(entry.target(), Some("b"));
        assert!(!entry.has_action());
        assert!(!entry.has_confirmation());
    }

    #[test]
    fn confirmed_always_asks() {
        let entry = confirmed("b", "Sure?");
        assert_eq!(entry.confirmation_message(&Value::Null), Some("Sure?".to_string()));
    }
}
