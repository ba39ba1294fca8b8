//! Builder for constructing process modules.

use crate::builder::error::BuildError;
use crate::core::{ProcessInfo, Scope, ViewState};
use crate::process::{InitFn, ProcessModule, ScopeDefinition, StartState};
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

/// Builder for [`ProcessModule`] with a fluent API.
pub struct ProcessModuleBuilder {
    name: String,
    states: Vec<ViewState>,
    init: Option<InitFn>,
    scope: Option<ScopeDefinition>,
}

impl ProcessModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            init: None,
            scope: None,
        }
    }

    pub fn state(mut self, state: ViewState) -> Self {
        self.states.push(state);
        self
    }

    pub fn states(mut self, states: impl IntoIterator<Item = ViewState>) -> Self {
        self.states.extend(states);
        self
    }

    /// Give the process a scope of this shape.
    pub fn scope(mut self, definition: ScopeDefinition) -> Self {
        self.scope = Some(definition);
        self
    }

    /// Set an asynchronous init function (or use [`start_at`](Self::start_at)).
    pub fn init<F, Fut>(mut self, init: F) -> Self
    where
        F: Fn(&ProcessInfo, Option<&Scope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StartState>> + Send + 'static,
    {
        self.init = Some(Arc::new(
            move |process: &ProcessInfo,
                  scope: Option<&Scope>|
                  -> BoxFuture<'static, anyhow::Result<StartState>> {
                Box::pin(init(process, scope))
            },
        ));
        self
    }

    /// Set a synchronous init function.
    pub fn init_sync<F>(mut self, init: F) -> Self
    where
        F: Fn(&ProcessInfo, Option<&Scope>) -> anyhow::Result<StartState> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(
            move |process: &ProcessInfo,
                  scope: Option<&Scope>|
                  -> BoxFuture<'static, anyhow::Result<StartState>> {
                let start = init(process, scope);
                Box::pin(async move { start })
            },
        ));
        self
    }

    /// Start every run of the process in `state`.
    pub fn start_at(self, state: impl Into<String>) -> Self {
        let state = state.into();
        self.init_sync(move |_, _| Ok(StartState::View(state.clone())))
    }

    pub fn build(self) -> Result<ProcessModule, BuildError> {
        if self.name.trim().is_empty() {
            return Err(BuildError::EmptyName);
        }
        if self.states.is_empty() {
            return Err(BuildError::NoStates(self.name));
        }
        let init = self.init.ok_or_else(|| BuildError::MissingInit(self.name.clone()))?;

        let mut states = BTreeMap::new();
        for state in self.states {
            let key = state.name().to_string();
            if states.insert(key.clone(), state).is_some() {
                return Err(BuildError::DuplicateState {
                    process: self.name,
                    state: key,
                });
            }
        }
        let state_names: BTreeSet<String> = states.keys().cloned().collect();

        Ok(ProcessModule {
            name: self.name,
            states,
            state_names: Arc::new(state_names),
            init,
            scope: self.scope,
        })
    }
}
