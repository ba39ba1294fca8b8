//! Transition value object.
//!
//! A [`Transition`] is created fresh for every transition execution and handed to
//! the transition action, which may redirect the target, replace the context or
//! request a history rewind with [`Transition::back`].

use super::error::StateError;
use super::scope::Scope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Position of a process in the engine's process stack. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub usize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only identity of a running process, handed to factories and init functions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub name: String,
    pub input: Value,
    pub parent: Option<ProcessId>,
}

/// Name of the synthetic transition that enters a process's first state.
pub const START_TRANSITION: &str = ".start";

/// One state-change attempt.
pub struct Transition {
    process: ProcessInfo,
    scope: Option<Scope>,
    states: Arc<BTreeSet<String>>,
    name: String,
    source: Option<String>,
    target: Option<String>,
    context: Value,
    navigation_pos: usize,
    history_index: Option<usize>,
    button: Option<String>,
    is_recorded: Option<bool>,
    discard: bool,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("process", &self.process.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("context", &self.context)
            .field("history_index", &self.history_index)
            .field("is_recorded", &self.is_recorded)
            .finish()
    }
}

impl Transition {
    pub(crate) fn new(
        process: ProcessInfo,
        scope: Option<Scope>,
        states: Arc<BTreeSet<String>>,
        name: impl Into<String>,
        source: Option<String>,
        context: Value,
        navigation_pos: usize,
    ) -> Self {
        Self {
            process,
            scope,
            states,
            name: name.into(),
            source,
            target: None,
            context,
            navigation_pos,
            history_index: None,
            button: None,
            is_recorded: None,
            discard: false,
        }
    }

    pub(crate) fn with_discard(mut self, discard: bool) -> Self {
        self.discard = discard;
        self
    }

    pub fn process(&self) -> &ProcessInfo {
        &self.process
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Resolved target: the explicitly set target, else the source state.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().or(self.source.as_deref())
    }

    /// Redirect the transition. Fails when `state` is not part of the process.
    pub fn set_target(&mut self, state: impl Into<String>) -> Result<(), StateError> {
        let state = state.into();
        if !self.states.contains(&state) {
            return Err(StateError::InvalidTargetState {
                state,
                process: self.process.name.clone(),
            });
        }
        self.target = Some(state);
        Ok(())
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn set_context(&mut self, context: Value) {
        self.context = context;
    }

    pub fn button(&self) -> Option<&str> {
        self.button.as_deref()
    }

    pub fn set_button(&mut self, button: impl Into<String>) {
        self.button = Some(button.into());
    }

    /// Request a rewind of `steps` navigation entries instead of a forward move.
    pub fn back(&mut self, steps: usize) -> Result<(), StateError> {
        if steps > self.navigation_pos {
            return Err(StateError::OutOfBounds {
                requested: steps,
                end: self.navigation_pos,
            });
        }
        self.history_index = Some(self.navigation_pos - steps);
        Ok(())
    }

    pub fn history_index(&self) -> Option<usize> {
        self.history_index
    }

    /// Explicit recording decision; `None` lets the engine decide.
    pub fn is_recorded(&self) -> Option<bool> {
        self.is_recorded
    }

    pub fn set_recorded(&mut self, recorded: bool) {
        self.is_recorded = Some(recorded);
    }

    /// Whether the transition entry was declared as discarding pending input.
    pub fn is_discard(&self) -> bool {
        self.discard
    }
}

/// Result of a transition execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The process is now in `target`.
    Advanced { target: String, recorded: bool },
    /// The action called `back()`; navigation was restored to `index`.
    HistoryBack { index: usize },
    /// The user declined the confirmation prompt; nothing happened.
    Declined,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transition(navigation_pos: usize) -> Transition {
        let states: BTreeSet<String> = ["list", "detail"].iter().map(|s| s.to_string()).collect();
        Transition::new(
            ProcessInfo {
                id: ProcessId(0),
                name: "orders".to_string(),
                input: Value::Null,
                parent: None,
            },
            None,
            Arc::new(states),
            "open",
            Some("list".to_string()),
            json!({"id": 7}),
            navigation_pos,
        )
    }

    #[test]
    fn target_defaults_to_source() {
        let t = transition(0);
        assert_eq!(t.target(), Some("list"));
    }

    #[test]
    fn set_target_accepts_known_states() {
        let mut t = transition(0);
        t.set_target("detail").unwrap();
        assert_eq!(t.target(), Some("detail"));
    }

    #[test]
    fn set_target_rejects_unknown_states() {
        let mut t = transition(0);
        let err = t.set_target("nowhere").unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTargetState {
                state: "nowhere".to_string(),
                process: "orders".to_string(),
            }
        );
        assert_eq!(t.target(), Some("list"));
    }

    #[test]
    fn back_computes_history_index() {
        let mut t = transition(3);
        t.back(2).unwrap();
        assert_eq!(t.history_index(), Some(1));
    }

    #[test]
    fn back_past_start_fails() {
        let mut t = transition(1);
        assert!(t.back(2).is_err());
        assert_eq!(t.history_index(), None);
    }

    #[test]
    fn context_can_be_replaced() {
        let mut t = transition(0);
        assert_eq!(t.context(), &json!({"id": 7}));
        t.set_context(json!("other"));
        assert_eq!(t.context(), &json!("other"));
    }

    #[test]
    fn recording_decision_is_optional() {
        let mut t = transition(0);
        assert_eq!(t.is_recorded(), None);
        t.set_recorded(false);
        assert_eq!(t.is_recorded(), Some(false));
    }
}
