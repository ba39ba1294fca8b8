//! Builder for constructing view states.

use crate::builder::error::BuildError;
use crate::core::{ProcessInfo, RenderFn, RestoreHook, Scope, TransitionFactory, TransitionMap, ViewState};
use serde_json::Value;
use std::sync::Arc;

/// Builder for [`ViewState`] with a fluent API.
#[derive(Default)]
pub struct ViewStateBuilder {
    name: Option<String>,
    transitions: Option<TransitionFactory>,
    render: Option<RenderFn>,
    page_title: Option<String>,
    after_restore: Option<RestoreHook>,
}

impl ViewStateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the transition-map factory (required).
    pub fn transitions<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ProcessInfo, Option<&Scope>) -> TransitionMap + Send + Sync + 'static,
    {
        self.transitions = Some(Arc::new(factory));
        self
    }

    /// A state without outgoing transitions.
    pub fn terminal(self) -> Self {
        self.transitions(|_, _| TransitionMap::new())
    }

    /// Set the render function (required).
    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(Option<&Scope>) -> Value + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(render));
        self
    }

    pub fn page_title(mut self, title: impl Into<String>) -> Self {
        self.page_title = Some(title.into());
        self
    }

    /// Hook run after a history restore lands on this state.
    pub fn after_restore<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&Scope>) + Send + Sync + 'static,
    {
        self.after_restore = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<ViewState, BuildError> {
        let name = self.name.unwrap_or_default();
        if name.trim().is_empty() {
            return Err(BuildError::EmptyName);
        }
        let transitions = self
            .transitions
            .ok_or_else(|| BuildError::MissingTransitions(name.clone()))?;
        let render = self
            .render
            .ok_or_else(|| BuildError::MissingRender(name.clone()))?;

        ViewState::from_parts(name, transitions, render, self.page_title, self.after_restore)
    }
}
