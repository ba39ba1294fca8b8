//! View states and their transition maps.
//!
//! A [`ViewState`] is an immutable descriptor: a unique name, a factory producing
//! the state's [`TransitionMap`], and a render function turning the process scope
//! into a view description. Transition maps are built per process, because the
//! actions they contain usually capture the process's scope.

use super::scope::Scope;
use super::transition::{ProcessInfo, Transition};
use crate::builder::BuildError;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type TransitionFactory =
    Arc<dyn Fn(&ProcessInfo, Option<&Scope>) -> TransitionMap + Send + Sync>;
pub type RenderFn = Arc<dyn Fn(Option<&Scope>) -> Value + Send + Sync>;
pub type RestoreHook = Arc<dyn Fn(Option<&Scope>) + Send + Sync>;

/// Returns a message to confirm before the transition runs, or `None`.
pub type Confirmation = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

pub type SyncAction = Arc<dyn Fn(&mut Transition) -> anyhow::Result<()> + Send + Sync>;
pub type AsyncAction =
    Arc<dyn Fn(Transition) -> BoxFuture<'static, anyhow::Result<Transition>> + Send + Sync>;

/// Body of a transition.
#[derive(Clone)]
pub enum Action {
    /// Runs to completion without suspending.
    Sync(SyncAction),
    /// Takes the transition by value and hands it back when done.
    Async(AsyncAction),
}

impl Action {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Transition) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Action::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Transition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Transition>> + Send + 'static,
    {
        Action::Async(Arc::new(
            move |t: Transition| -> BoxFuture<'static, anyhow::Result<Transition>> { Box::pin(f(t)) },
        ))
    }

    pub(crate) async fn run(&self, transition: Transition) -> anyhow::Result<Transition> {
        match self {
            Action::Sync(f) => {
                let mut transition = transition;
                f(&mut transition)?;
                Ok(transition)
            }
            Action::Async(f) => f(transition).await,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Sync(_) => f.write_str("Action::Sync"),
            Action::Async(_) => f.write_str("Action::Async"),
        }
    }
}

/// One named transition of a view state.
#[derive(Clone, Default)]
pub struct TransitionEntry {
    pub(crate) to: Option<String>,
    pub(crate) action: Option<Action>,
    pub(crate) discard: bool,
    pub(crate) confirmation: Option<Confirmation>,
}

impl TransitionEntry {
    /// Plain move to `target`.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            to: Some(target.into()),
            ..Self::default()
        }
    }

    /// Action without a declared target; the action decides (or stays).
    pub fn action(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn is_discard(&self) -> bool {
        self.discard
    }

    pub fn has_confirmation(&self) -> bool {
        self.confirmation.is_some()
    }

    /// Confirmation message for `context`, if the entry asks for one.
    pub fn confirmation_message(&self, context: &Value) -> Option<String> {
        self.confirmation.as_ref().and_then(|confirm| confirm(context))
    }
}

impl fmt::Debug for TransitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionEntry")
            .field("to", &self.to)
            .field("action", &self.action)
            .field("discard", &self.discard)
            .field("confirmation", &self.confirmation.is_some())
            .finish()
    }
}

/// Transition name to entry.
#[derive(Clone, Debug, Default)]
pub struct TransitionMap {
    entries: BTreeMap<String, TransitionEntry>,
}

impl TransitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, entry: TransitionEntry) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TransitionEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TransitionEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct ViewStateInner {
    name: String,
    transitions: TransitionFactory,
    render: RenderFn,
    page_title: Option<String>,
    after_restore: Option<RestoreHook>,
}

/// Immutable view-state descriptor. Cloning is cheap.
#[derive(Clone)]
pub struct ViewState {
    inner: Arc<ViewStateInner>,
}

impl ViewState {
    /// Create a view state. Fails when `name` is empty.
    ///
    /// Use [`ViewStateBuilder`](crate::builder::ViewStateBuilder) for the optional parts.
    pub fn new<T, R>(name: impl Into<String>, transitions: T, render: R) -> Result<Self, BuildError>
    where
        T: Fn(&ProcessInfo, Option<&Scope>) -> TransitionMap + Send + Sync + 'static,
        R: Fn(Option<&Scope>) -> Value + Send + Sync + 'static,
    {
        Self::from_parts(
            name.into(),
            Arc::new(transitions),
            Arc::new(render),
            None,
            None,
        )
    }

    pub(crate) fn from_parts(
        name: String,
        transitions: TransitionFactory,
        render: RenderFn,
        page_title: Option<String>,
        after_restore: Option<RestoreHook>,
    ) -> Result<Self, BuildError> {
        if name.trim().is_empty() {
            return Err(BuildError::EmptyName);
        }
        Ok(Self {
            inner: Arc::new(ViewStateInner {
                name,
                transitions,
                render,
                page_title,
                after_restore,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn page_title(&self) -> Option<&str> {
        self.inner.page_title.as_deref()
    }

    pub fn create_transition_map(&self, process: &ProcessInfo, scope: Option<&Scope>) -> TransitionMap {
        (self.inner.transitions)(process, scope)
    }

    pub fn render(&self, scope: Option<&Scope>) -> Value {
        (self.inner.render)(scope)
    }

    pub fn after_restore(&self, scope: Option<&Scope>) {
        if let Some(hook) = &self.inner.after_restore {
            hook(scope);
        }
    }

    pub fn ptr_eq(&self, other: &ViewState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewState")
            .field("name", &self.inner.name)
            .field("page_title", &self.inner.page_title)
            .finish_non_exhaustive()
    }
}
