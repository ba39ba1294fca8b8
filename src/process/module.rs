//! Process definitions as resolved by a [`ProcessImporter`](super::ProcessImporter).

use crate::core::{Action, ProcessInfo, Scope, ViewState};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub type InitFn = Arc<
    dyn Fn(&ProcessInfo, Option<&Scope>) -> BoxFuture<'static, anyhow::Result<StartState>>
        + Send
        + Sync,
>;

/// What a process's init function resolves to.
#[derive(Clone, Debug)]
pub enum StartState {
    /// Enter this view state.
    View(String),
    /// Run this action as the `.start` transition; it must set the target.
    Action(Action),
}

/// A scope property filled from server-provided injection data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InjectionQuery {
    pub property: String,
    pub key: String,
}

/// Shape of a process scope: initial field values plus declared injection queries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeDefinition {
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub queries: Vec<InjectionQuery>,
}

impl ScopeDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn query(mut self, property: impl Into<String>, key: impl Into<String>) -> Self {
        self.queries.push(InjectionQuery {
            property: property.into(),
            key: key.into(),
        });
        self
    }

    pub fn instantiate(&self) -> Scope {
        Scope::from_fields(self.fields.clone())
    }
}

/// A loaded process definition: its view states, init function and scope shape.
pub struct ProcessModule {
    pub(crate) name: String,
    pub(crate) states: BTreeMap<String, ViewState>,
    pub(crate) state_names: Arc<BTreeSet<String>>,
    pub(crate) init: InitFn,
    pub(crate) scope: Option<ScopeDefinition>,
}

impl ProcessModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self, name: &str) -> Option<&ViewState> {
        self.states.get(name)
    }

    pub fn state_names(&self) -> Arc<BTreeSet<String>> {
        Arc::clone(&self.state_names)
    }

    pub fn scope_definition(&self) -> Option<&ScopeDefinition> {
        self.scope.as_ref()
    }

    pub(crate) fn init(
        &self,
        process: &ProcessInfo,
        scope: Option<&Scope>,
    ) -> BoxFuture<'static, anyhow::Result<StartState>> {
        (self.init)(process, scope)
    }
}

impl fmt::Debug for ProcessModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessModule")
            .field("name", &self.name)
            .field("states", &self.state_names)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
