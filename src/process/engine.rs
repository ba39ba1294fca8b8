//! The process engine.
//!
//! [`ProcessEngine`] owns the process stack, the pointer to the current process
//! and the linear navigation history. Every operation goes through `&mut self`,
//! so a transition has exclusive access to the engine until its future completes.
//!
//! Suspension points are limited to the external collaborators: module import,
//! injection fetch, init functions, confirmation prompts and async transition
//! actions. Everything between them is synchronous, so observers and the
//! renderer only ever see completed updates.
//!
//! # Example
//!
//! ```
//! use flowstate::builder::{ProcessModuleBuilder, ViewStateBuilder};
//! use flowstate::process::{
//!     Collaborators, EngineConfig, ProcessEngine, ProcessOptions, StaticImporter,
//! };
//! use flowstate::transition_map;
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let list = ViewStateBuilder::new("list")
//!     .transitions(|_, _| transition_map! { "open" => "detail" })
//!     .render(|_| json!({"view": "list"}))
//!     .build()
//!     .unwrap();
//! let detail = ViewStateBuilder::new("detail")
//!     .terminal()
//!     .render(|_| json!({"view": "detail"}))
//!     .build()
//!     .unwrap();
//! let module = ProcessModuleBuilder::new("orders")
//!     .states([list, detail])
//!     .start_at("list")
//!     .build()
//!     .unwrap();
//!
//! let importer = StaticImporter::new().with_module(module);
//! let mut engine = ProcessEngine::new(EngineConfig::default(), Collaborators::new(importer));
//!
//! let id = engine
//!     .render_process("orders", Value::Null, ProcessOptions::default())
//!     .await
//!     .unwrap();
//! engine.transition(id, "open", Value::Null).await.unwrap();
//!
//! assert_eq!(engine.current_process().and_then(|p| p.current_state()), Some("detail"));
//! assert_eq!(engine.navigation().len(), 2);
//! # }
//! ```

use super::collaborators::{Collaborators, InjectionRequest, RenderFrame, RenderOutput};
use super::config::EngineConfig;
use super::effects::Effect;
use super::error::ProcessError;
use super::instance::{Completion, Process, ProcessOptions};
use super::module::{ScopeDefinition, StartState};
use super::navigation::{NavigationEntry, NavigationHistory, NavigationState};
use crate::core::{
    Action, ProcessHistory, ProcessId, ProcessInfo, Scope, StateError, Transition,
    TransitionOutcome, VersioningStrategy, START_TRANSITION,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Result of reconciling a host history POP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryRestore {
    Restored { index: usize, process_id: ProcessId },
    /// The popped entry is already current.
    Unchanged,
    /// The popped entry no longer exists; a placeholder was rendered.
    Gone,
}

/// Handle to a running sub-process, held by whoever started it.
#[derive(Debug)]
pub struct SubProcess {
    id: ProcessId,
    receiver: oneshot::Receiver<Result<Value, Value>>,
}

impl SubProcess {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Wait for [`ProcessEngine::end_sub_process`] or
    /// [`ProcessEngine::abort_sub_process`].
    pub async fn finished(self) -> Result<Value, ProcessError> {
        match self.receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(ProcessError::SubProcessAborted { reason }),
            Err(_) => Err(ProcessError::SubProcessDropped),
        }
    }
}

/// Run an action as one batched unit of scope mutation.
async fn run_batched(
    action: &Action,
    transition: Transition,
    scope: Option<&Scope>,
) -> anyhow::Result<Transition> {
    let batch = scope.map(Scope::begin_batch);
    let transition = action.run(transition).await?;
    if let Some(batch) = batch {
        batch.commit();
    }
    Ok(transition)
}

pub struct ProcessEngine {
    config: EngineConfig,
    collaborators: Collaborators,
    versioning: VersioningStrategy,
    processes: Vec<Process>,
    current: Option<ProcessId>,
    navigation: NavigationHistory,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let versioning = config.versioning();
        let navigation = NavigationHistory::new(config.max_navigation_history);
        Self {
            config,
            collaborators,
            versioning,
            processes: Vec::new(),
            current: None,
            navigation,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn current_id(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn current_process(&self) -> Option<&Process> {
        self.current.and_then(|id| self.processes.get(id.0))
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id.0)
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn navigation(&self) -> &NavigationHistory {
        &self.navigation
    }

    fn process_mut(&mut self, id: ProcessId) -> Result<&mut Process, ProcessError> {
        self.processes
            .get_mut(id.0)
            .ok_or(ProcessError::UnknownProcess(id))
    }

    /// Forget every process and all navigation history.
    pub fn reset(&mut self) {
        for process in &mut self.processes {
            process.deactivate();
            process.detach_history();
        }
        self.processes.clear();
        self.current = None;
        self.navigation.clear();
    }

    /// Start a root process, replacing the current process tree.
    ///
    /// With [`ProcessOptions::force_sub_process`] the process starts as a
    /// sub-process of the current process instead.
    pub async fn render_process(
        &mut self,
        name: &str,
        input: Value,
        options: ProcessOptions,
    ) -> Result<ProcessId, ProcessError> {
        let parent = if options.force_sub_process {
            self.current
        } else {
            None
        };
        self.start_process(name, input, options, parent, None).await
    }

    /// Start `name` as a sub-process of `parent`. The parent is paused until the
    /// sub-process ends.
    pub async fn run_sub_process(
        &mut self,
        parent: ProcessId,
        name: &str,
        input: Value,
        options: ProcessOptions,
    ) -> Result<SubProcess, ProcessError> {
        self.process_mut(parent)?;
        let (sender, receiver) = oneshot::channel();
        let id = self
            .start_process(name, input, options, Some(parent), Some(sender))
            .await?;
        Ok(SubProcess { id, receiver })
    }

    async fn start_process(
        &mut self,
        name: &str,
        input: Value,
        options: ProcessOptions,
        parent: Option<ProcessId>,
        completion: Option<Completion>,
    ) -> Result<ProcessId, ProcessError> {
        let previous = self.current;
        match self
            .start_process_inner(name, input, options, parent, completion, previous)
            .await
        {
            Ok(id) => Ok(id),
            Err(error) => {
                tracing::error!(process = %name, error = %error, "process start failed");
                self.current = previous;
                self.collaborators.renderer.render(RenderOutput::Error {
                    process: name.to_string(),
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn start_process_inner(
        &mut self,
        name: &str,
        input: Value,
        options: ProcessOptions,
        parent: Option<ProcessId>,
        completion: Option<Completion>,
        previous: Option<ProcessId>,
    ) -> Result<ProcessId, ProcessError> {
        let importer = Arc::clone(&self.collaborators.importer);
        let module = importer.import(name).await?;

        let id = ProcessId(self.processes.len());
        let info = ProcessInfo {
            id,
            name: name.to_string(),
            input,
            parent,
        };
        let definition = module.scope_definition().cloned();
        let scope = definition.as_ref().map(ScopeDefinition::instantiate);

        let mut process = Process::new(
            info.clone(),
            Arc::clone(&module),
            scope.clone(),
            options,
            self.versioning.clone(),
        );
        process.completion = completion;
        self.processes.push(process);
        self.current = Some(id);
        tracing::debug!(process_id = %id, process = %name, "process allocated");

        if let (Some(scope), Some(definition)) = (&scope, &definition) {
            self.inject(name, &info.input, scope, definition).await?;
        }
        self.process_mut(id)?.attach_history();

        let start = module
            .init(&info, scope.as_ref())
            .await
            .map_err(|e| ProcessError::from_action(START_TRANSITION, e))?;

        let navigation_pos = self.navigation.cursor().unwrap_or(0);
        let mut transition = Transition::new(
            info,
            scope.clone(),
            module.state_names(),
            START_TRANSITION,
            None,
            Value::Null,
            navigation_pos,
        );
        let transition = match start {
            StartState::View(state) => {
                transition.set_target(state)?;
                transition
            }
            StartState::Action(action) => run_batched(&action, transition, scope.as_ref())
                .await
                .map_err(|e| ProcessError::from_action(START_TRANSITION, e))?,
        };
        let target = transition
            .target()
            .map(str::to_string)
            .ok_or_else(|| ProcessError::NoStartState(name.to_string()))?;

        let process = self.process_mut(id)?;
        process.enter_state(&target)?;
        process.initialized = true;

        match parent {
            Some(parent) => self.process_mut(parent)?.deactivate(),
            None => {
                if let Some(previous) = previous {
                    for old in self.chain(previous) {
                        self.process_mut(old)?.deactivate();
                    }
                }
            }
        }

        let process = self.process_mut(id)?;
        process.activate();
        let history_pos = process.history_pos();
        self.push_navigation(id, &target, history_pos);
        self.render(id);
        tracing::info!(process_id = %id, process = %name, state = %target, "process started");
        Ok(id)
    }

    async fn inject(
        &self,
        name: &str,
        input: &Value,
        scope: &Scope,
        definition: &ScopeDefinition,
    ) -> Result<(), ProcessError> {
        if definition.queries.is_empty() {
            return Ok(());
        }
        let request = InjectionRequest {
            app: self.config.app_name.clone(),
            process: name.to_string(),
            input: input.clone(),
        };
        let fetcher = Arc::clone(&self.collaborators.injections);
        let injections = fetcher.fetch(&request).await?.into_result()?;

        let mut writes = Vec::with_capacity(definition.queries.len());
        for query in &definition.queries {
            let value = injections.get(&query.key).cloned().ok_or_else(|| {
                ProcessError::InjectionNotFound {
                    process: name.to_string(),
                    key: query.key.clone(),
                }
            })?;
            writes.push((query.property.clone(), Some(value)));
        }
        scope.apply(writes);
        Ok(())
    }

    /// Execute the transition `name` of process `id`.
    ///
    /// A failing action leaves the process in its pre-transition state: its scope
    /// mutations are rolled back and nothing is recorded or rendered.
    pub async fn transition(
        &mut self,
        id: ProcessId,
        name: &str,
        context: Value,
    ) -> Result<TransitionOutcome, ProcessError> {
        let navigation_pos = self.navigation.cursor().unwrap_or(0);
        let (info, scope, states, source, entry, history) = {
            let process = self.process_mut(id)?;
            if !process.initialized {
                return Err(ProcessError::NotInitialized(id));
            }
            if process.ended {
                return Err(ProcessError::AlreadyEnded(id));
            }
            if !process.active {
                return Err(ProcessError::NotActive(id));
            }
            let source = process
                .current_state
                .clone()
                .ok_or(ProcessError::NotInitialized(id))?;
            let map = process.transition_map(&source)?;
            let entry = map
                .get(name)
                .cloned()
                .ok_or_else(|| ProcessError::UnknownTransition {
                    process: process.name().to_string(),
                    state: source.clone(),
                    transition: name.to_string(),
                })?;
            (
                process.info.clone(),
                process.scope.clone(),
                process.module.state_names(),
                source,
                entry,
                Arc::clone(&process.history),
            )
        };
        tracing::debug!(process_id = %id, state = %source, transition = %name, "executing transition");

        if let Some(message) = entry.confirmation_message(&context) {
            let confirm = Arc::clone(&self.collaborators.confirm);
            if !confirm.confirm(&message).await {
                tracing::warn!(process_id = %id, transition = %name, "transition declined");
                return Ok(TransitionOutcome::Declined);
            }
        }

        let history_before = history.lock().pos();
        let mut transition = Transition::new(
            info,
            scope.clone(),
            states,
            name,
            Some(source.clone()),
            context,
            navigation_pos,
        )
        .with_discard(entry.is_discard());
        if let Some(target) = entry.target() {
            transition.set_target(target)?;
        }
        if let Some(action) = &entry.action {
            transition = match run_batched(action, transition, scope.as_ref()).await {
                Ok(transition) => transition,
                Err(error) => {
                    let error = ProcessError::from_action(name, error);
                    tracing::error!(process_id = %id, transition = %name, error = %error, "transition failed");
                    return Err(error);
                }
            };
        }

        if let Some(index) = transition.history_index() {
            let cursor = self.navigation.cursor().unwrap_or(0);
            self.restore_position(index)?;
            self.collaborators
                .history
                .go(index as isize - cursor as isize);
            return Ok(TransitionOutcome::HistoryBack { index });
        }

        let target = transition.target().unwrap_or(source.as_str()).to_string();
        let history_after = history.lock().pos();
        let recorded = transition
            .is_recorded()
            .unwrap_or(target != source || history_after != history_before);

        self.process_mut(id)?.enter_state(&target)?;
        if recorded {
            self.push_navigation(id, &target, history_after);
        } else if history_after != history_before {
            // Forward entries point past the truncated change history.
            self.navigation.truncate_forward();
        }
        self.render(id);
        tracing::debug!(process_id = %id, state = %target, recorded, "transition resolved");
        Ok(TransitionOutcome::Advanced { target, recorded })
    }

    /// End sub-process `id` successfully, resolving the parent's [`SubProcess`].
    pub fn end_sub_process(&mut self, id: ProcessId, result: Value) -> Result<(), ProcessError> {
        self.finish_sub_process(id, Ok(result))
    }

    /// End sub-process `id` with a rejection.
    pub fn abort_sub_process(&mut self, id: ProcessId, reason: Value) -> Result<(), ProcessError> {
        self.finish_sub_process(id, Err(reason))
    }

    fn finish_sub_process(
        &mut self,
        id: ProcessId,
        outcome: Result<Value, Value>,
    ) -> Result<(), ProcessError> {
        let process = self.process_mut(id)?;
        let parent = process.parent().ok_or(ProcessError::NotASubProcess(id))?;
        if process.ended {
            return Err(ProcessError::AlreadyEnded(id));
        }
        process.deactivate();
        process.ended = true;
        let aborted = outcome.is_err();
        if let Some(completion) = process.completion.take() {
            // The parent may have stopped waiting.
            let _ = completion.send(outcome);
        }

        let current_chain = self.current.map(|c| self.chain(c)).unwrap_or_default();
        if current_chain.contains(&id) {
            for nested in current_chain.into_iter().take_while(|p| *p != id) {
                self.process_mut(nested)?.deactivate();
            }
            self.current = Some(parent);
            self.process_mut(parent)?.activate();
            self.render(parent);
        }
        tracing::info!(process_id = %id, parent_id = %parent, aborted, "sub-process ended");
        Ok(())
    }

    /// Reconcile a POP event carrying `state` from the host history.
    pub fn on_history_action(
        &mut self,
        state: &NavigationState,
    ) -> Result<HistoryRestore, ProcessError> {
        let Some(index) = self.navigation.find(state.navigation_id) else {
            tracing::warn!(navigation_id = %state.navigation_id, "view state gone");
            self.collaborators.renderer.render(RenderOutput::Gone);
            return Ok(HistoryRestore::Gone);
        };
        let Some(process_id) = self
            .navigation
            .get(index)
            .map(|entry| entry.process_id)
            .filter(|_| self.navigation.cursor() != Some(index))
        else {
            return Ok(HistoryRestore::Unchanged);
        };
        self.restore_position(index)?;
        Ok(HistoryRestore::Restored { index, process_id })
    }

    /// Restore navigation entry `index`: switch effects between the current and
    /// the target process, replay the target's change history to the recorded
    /// position, land on the recorded state and render once.
    pub fn restore_position(&mut self, index: usize) -> Result<(), ProcessError> {
        let entry = self
            .navigation
            .get(index)
            .cloned()
            .ok_or(StateError::OutOfBounds {
                requested: index,
                end: self.navigation.len(),
            })?;
        let target_id = entry.process_id;

        let target = self.process_mut(target_id)?;
        if target.module.state(&entry.state).is_none() {
            return Err(StateError::InvalidTargetState {
                state: entry.state,
                process: target.name().to_string(),
            }
            .into());
        }
        if let Some(scope) = target.scope.clone() {
            ProcessHistory::navigate(&target.history, &scope, entry.history_pos)?;
        }

        let from = self.current;
        let ancestor = from.and_then(|from| self.common_ancestor(from, target_id));
        if let Some(from) = from {
            for outgoing in self.chain(from).into_iter().take_while(|p| Some(*p) != ancestor) {
                self.process_mut(outgoing)?.deactivate();
            }
        }
        // Ancestors of the target stay paused while the target is active.
        for paused in self.chain(target_id).into_iter().skip(1) {
            self.process_mut(paused)?.deactivate();
        }

        let target = self.process_mut(target_id)?;
        target.ended = false;
        target.enter_state(&entry.state)?;
        target.activate();
        if let Some(view_state) = target.current_view_state() {
            view_state.after_restore(target.scope());
        }

        self.current = Some(target_id);
        self.navigation.set_cursor(index);
        self.render(target_id);
        tracing::info!(process_id = %target_id, state = %entry.state, index, "navigation restored");
        Ok(())
    }

    /// Add an effect to process `id`. It starts right away when its bucket is live.
    pub fn add_effect(
        &mut self,
        id: ProcessId,
        view: Option<&str>,
        effect: Effect,
    ) -> Result<(), ProcessError> {
        let process = self.process_mut(id)?;
        process.effects.add(view, effect);
        let live = process.active && (view.is_none() || view == process.current_state.as_deref());
        if live {
            process.effects.register(view);
        }
        Ok(())
    }

    /// Render frame for the current state of process `id`.
    pub fn frame(&self, id: ProcessId) -> Option<RenderFrame> {
        let process = self.processes.get(id.0)?;
        let view_state = process.current_view_state()?;
        Some(RenderFrame {
            process_id: id,
            process: process.name().to_string(),
            state: view_state.name().to_string(),
            page_title: view_state.page_title().map(str::to_string),
            view: view_state.render(process.scope()),
            layout: process.options.layout.clone(),
            as_dialog: process.options.as_dialog,
            dialog: process.options.dialog.clone(),
        })
    }

    /// Host URI of `state` in process `id`.
    pub fn uri(&self, id: ProcessId, state: &str) -> String {
        let process = self.processes.get(id.0).map(Process::name).unwrap_or_default();
        format!(
            "{}{}/{}/{}",
            self.config.base_uri, self.config.app_name, process, state
        )
    }

    fn render(&self, id: ProcessId) {
        if let Some(frame) = self.frame(id) {
            self.collaborators.renderer.render(RenderOutput::View(frame));
        }
    }

    fn push_navigation(&mut self, id: ProcessId, state: &str, history_pos: usize) {
        let entry = NavigationEntry::new(id, state, history_pos);
        let navigation_state = NavigationState {
            navigation_id: entry.id,
        };
        self.navigation.push(entry);
        let uri = self.uri(id, state);
        self.collaborators.history.push(navigation_state, &uri);
        self.prune_navigation();
    }

    fn prune_navigation(&mut self) {
        let dropped = self.navigation.prune();
        if dropped.is_empty() {
            return;
        }
        let processes = &self.processes;
        let reachable = self
            .navigation
            .reachable(|id| processes.get(id.0).and_then(Process::parent));
        tracing::warn!(dropped = dropped.len(), "navigation history pruned");
        for process in self
            .processes
            .iter_mut()
            .filter(|p| !reachable.contains(&p.id()))
        {
            process.deactivate();
        }
    }

    /// `id` followed by its ancestors up to the root.
    fn chain(&self, id: ProcessId) -> Vec<ProcessId> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(id) = next {
            chain.push(id);
            next = self.processes.get(id.0).and_then(Process::parent);
        }
        chain
    }

    fn common_ancestor(&self, a: ProcessId, b: ProcessId) -> Option<ProcessId> {
        let outgoing = self.chain(a);
        self.chain(b).into_iter().find(|id| outgoing.contains(id))
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("config", &self.config)
            .field("processes", &self.processes)
            .field("current", &self.current)
            .field("navigation", &self.navigation.len())
            .finish()
    }
}
