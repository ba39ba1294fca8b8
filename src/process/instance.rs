//! A single running process.

use super::effects::EffectRegistry;
use super::error::ProcessError;
use super::module::ProcessModule;
use crate::core::{
    ObserverId, ProcessHistory, ProcessId, ProcessInfo, Scope, TransitionMap, VersioningStrategy,
    ViewState,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Presentation hints passed through to the renderer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessOptions {
    pub layout: Option<String>,
    pub as_dialog: bool,
    /// Start a root-level render as a sub-process of the current process.
    pub force_sub_process: bool,
    /// Dialog title when shown as a dialog.
    pub dialog: Option<String>,
}

pub(crate) type Completion = oneshot::Sender<Result<Value, Value>>;

/// A running state-machine instance.
///
/// Processes are owned by the [`ProcessEngine`](super::ProcessEngine) and never
/// removed from its stack; ended or replaced processes stay addressable for
/// back-navigation but hold no active effects.
pub struct Process {
    pub(crate) info: ProcessInfo,
    pub(crate) module: Arc<ProcessModule>,
    pub(crate) scope: Option<Scope>,
    pub(crate) current_state: Option<String>,
    pub(crate) options: ProcessOptions,
    pub(crate) history: Arc<Mutex<ProcessHistory>>,
    pub(crate) effects: EffectRegistry,
    transition_maps: HashMap<String, Arc<TransitionMap>>,
    pub(crate) initialized: bool,
    pub(crate) active: bool,
    observer: Option<ObserverId>,
    pub(crate) completion: Option<Completion>,
    pub(crate) ended: bool,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("parent", &self.info.parent)
            .field("current_state", &self.current_state)
            .field("initialized", &self.initialized)
            .field("active", &self.active)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl Process {
    pub(crate) fn new(
        info: ProcessInfo,
        module: Arc<ProcessModule>,
        scope: Option<Scope>,
        options: ProcessOptions,
        versioning: VersioningStrategy,
    ) -> Self {
        Self {
            info,
            module,
            scope,
            current_state: None,
            options,
            history: Arc::new(Mutex::new(ProcessHistory::new(versioning))),
            effects: EffectRegistry::default(),
            transition_maps: HashMap::new(),
            initialized: false,
            active: false,
            observer: None,
            completion: None,
            ended: false,
        }
    }

    /// Start recording committed scope updates into the process history.
    pub(crate) fn attach_history(&mut self) {
        if self.observer.is_some() {
            return;
        }
        if let Some(scope) = &self.scope {
            let history = Arc::clone(&self.history);
            self.observer = Some(scope.observe(move |update| {
                history.lock().record_update(update);
            }));
        }
    }

    pub(crate) fn detach_history(&mut self) {
        if let (Some(scope), Some(observer)) = (&self.scope, self.observer.take()) {
            scope.unobserve(observer);
        }
    }

    pub fn id(&self) -> ProcessId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn input(&self) -> &Value {
        &self.info.input
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.info.parent
    }

    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    pub fn module(&self) -> &ProcessModule {
        &self.module
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn current_state(&self) -> Option<&str> {
        self.current_state.as_deref()
    }

    pub fn current_view_state(&self) -> Option<&ViewState> {
        self.current_state
            .as_deref()
            .and_then(|state| self.module.state(state))
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_sub_process(&self) -> bool {
        self.info.parent.is_some()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn history_pos(&self) -> usize {
        self.history.lock().pos()
    }

    /// Snapshot of the process's change history.
    pub fn history(&self) -> ProcessHistory {
        self.history.lock().clone()
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    /// Transition map of `state`, created on first use and cached afterwards.
    pub(crate) fn transition_map(&mut self, state: &str) -> Result<Arc<TransitionMap>, ProcessError> {
        if let Some(map) = self.transition_maps.get(state) {
            return Ok(Arc::clone(map));
        }
        let view_state = self.module.state(state).ok_or_else(|| {
            crate::core::StateError::InvalidTargetState {
                state: state.to_string(),
                process: self.info.name.clone(),
            }
        })?;
        let map = Arc::new(view_state.create_transition_map(&self.info, self.scope.as_ref()));
        self.transition_maps
            .insert(state.to_string(), Arc::clone(&map));
        Ok(map)
    }

    /// Move to `state`, switching view-scoped effects when the process is active.
    pub(crate) fn enter_state(&mut self, state: &str) -> Result<(), ProcessError> {
        self.transition_map(state)?;
        let previous = self.current_state.replace(state.to_string());
        if self.active {
            if let Some(previous) = previous.as_deref().filter(|p| *p != state) {
                self.effects.unregister(Some(previous));
            }
            self.effects.register(Some(state));
        }
        Ok(())
    }

    pub(crate) fn activate(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.effects.register(None);
        if let Some(state) = self.current_state.clone() {
            self.effects.register(Some(&state));
        }
        tracing::debug!(process_id = %self.info.id, "effects registered");
    }

    pub(crate) fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.effects.unregister_all();
        self.active = false;
        tracing::debug!(process_id = %self.info.id, "effects unregistered");
    }
}
