//! Builder for constructing transition entries.

use crate::builder::error::BuildError;
use crate::core::{Action, Transition, TransitionEntry};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Builder for [`TransitionEntry`] with a fluent API.
#[derive(Default)]
pub struct TransitionBuilder {
    entry: TransitionEntry,
}

impl TransitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the declared target state.
    pub fn to(mut self, state: impl Into<String>) -> Self {
        self.entry.to = Some(state.into());
        self
    }

    /// Set a synchronous action.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut Transition) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entry.action = Some(Action::sync(action));
        self
    }

    /// Set an asynchronous action.
    pub fn action_async<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(Transition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Transition>> + Send + 'static,
    {
        self.entry.action = Some(Action::future(action));
        self
    }

    /// Mark the transition as discarding pending input.
    pub fn discard(mut self) -> Self {
        self.entry.discard = true;
        self
    }

    /// Ask for confirmation when `confirm` returns a message for the context.
    pub fn confirm<F>(mut self, confirm: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.entry.confirmation = Some(Arc::new(confirm));
        self
    }

    /// Always ask `message` before running.
    pub fn confirm_with(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.confirm(move |_| Some(message.clone()))
    }

    pub fn build(self) -> Result<TransitionEntry, BuildError> {
        if self.entry.to.is_none() && self.entry.action.is_none() {
            return Err(BuildError::MissingTarget);
        }
        Ok(self.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_requires_target_or_action() {
        let result = TransitionBuilder::new().discard().build();
        assert!(matches!(result, Err(BuildError::MissingTarget)));
    }

    #[test]
    fn action_only_entry_builds() {
        let entry = TransitionBuilder::new()
            .action(|t| {
                t.set_context(json!(null));
                Ok(())
            })
            .build()
            .unwrap();

        assert!(entry.has_action());
        assert_eq!(entry.target(), None);
    }

    #[test]
    fn fluent_api_builds_entry() {
        let entry = TransitionBuilder::new()
            .to("detail")
            .discard()
            .confirm_with("Leave?")
            .build()
            .unwrap();

        assert_eq!(entry.target(), Some("detail"));
        assert!(entry.is_discard());
        assert_eq!(entry.confirmation_message(&Value::Null), Some("Leave?".to_string()));
    }
}
