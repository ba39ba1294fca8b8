//! Process engine behaviour across starts, transitions, sub-processes and POPs.

use async_trait::async_trait;
use flowstate::builder::{ProcessModuleBuilder, TransitionBuilder, ViewStateBuilder};
use flowstate::core::{ProcessId, Transition, TransitionOutcome};
use flowstate::process::{
    Cleanup, Collaborators, ConfirmPrompt, Effect, EngineConfig, HistoryRestore, HostHistory,
    InjectionFetcher, InjectionRequest, InjectionResponse, NavigationState, ProcessEngine,
    ProcessError, ProcessModule, ProcessOptions, RenderOutput, Renderer, ScopeDefinition,
    StaticImporter,
};
use flowstate::transition_map;
use flowstate::transport::TransportError;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct RecordingRenderer {
    outputs: Mutex<Vec<RenderOutput>>,
}

impl RecordingRenderer {
    fn last(&self) -> Option<RenderOutput> {
        self.outputs.lock().last().cloned()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, output: RenderOutput) {
        self.outputs.lock().push(output);
    }
}

#[derive(Default)]
struct RecordingHistory {
    pushes: Mutex<Vec<(NavigationState, String)>>,
    moves: Mutex<Vec<isize>>,
}

impl RecordingHistory {
    fn state(&self, index: usize) -> NavigationState {
        self.pushes.lock()[index].0
    }
}

impl HostHistory for RecordingHistory {
    fn push(&self, state: NavigationState, uri: &str) {
        self.pushes.lock().push((state, uri.to_string()));
    }

    fn go(&self, delta: isize) {
        self.moves.lock().push(delta);
    }
}

struct Decline;

#[async_trait]
impl ConfirmPrompt for Decline {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }
}

struct FixedInjections(Map<String, Value>);

#[async_trait]
impl InjectionFetcher for FixedInjections {
    async fn fetch(&self, _request: &InjectionRequest) -> Result<InjectionResponse, TransportError> {
        Ok(InjectionResponse {
            injections: self.0.clone(),
            error: None,
        })
    }
}

fn count(scope: Option<&flowstate::Scope>) -> i64 {
    scope
        .and_then(|s| s.get("v_count"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

fn increment(t: &mut Transition) -> anyhow::Result<()> {
    let next = count(t.scope()) + 1;
    if let Some(scope) = t.scope() {
        scope.set("v_count", json!(next));
    }
    Ok(())
}

fn orders() -> ProcessModule {
    let list = ViewStateBuilder::new("list")
        .transitions(|_, _| {
            transition_map! {
                "open" => "detail",
                "count" => TransitionBuilder::new().action(increment).build().unwrap(),
                "fail" => TransitionBuilder::new()
                    .action(|t: &mut Transition| {
                        increment(t)?;
                        anyhow::bail!("backend unavailable")
                    })
                    .build()
                    .unwrap(),
                "back" => TransitionBuilder::new()
                    .action(|t: &mut Transition| {
                        t.back(1)?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
                "quiet" => TransitionBuilder::new()
                    .action(|t: &mut Transition| {
                        increment(t)?;
                        t.set_recorded(false);
                        Ok(())
                    })
                    .build()
                    .unwrap(),
                "leave" => TransitionBuilder::new()
                    .to("detail")
                    .confirm_with("Discard changes?")
                    .build()
                    .unwrap(),
            }
        })
        .render(|scope| json!({"view": "list", "count": count(scope)}))
        .page_title("Orders")
        .build()
        .unwrap();
    let detail = ViewStateBuilder::new("detail")
        .terminal()
        .render(|_| json!({"view": "detail"}))
        .build()
        .unwrap();
    ProcessModuleBuilder::new("orders")
        .states([list, detail])
        .scope(ScopeDefinition::new().field("v_count", json!(0)))
        .start_at("list")
        .build()
        .unwrap()
}

fn picker() -> ProcessModule {
    let pick = ViewStateBuilder::new("pick")
        .terminal()
        .render(|_| json!({"view": "pick"}))
        .build()
        .unwrap();
    ProcessModuleBuilder::new("picker")
        .state(pick)
        .start_at("pick")
        .build()
        .unwrap()
}

fn broken() -> ProcessModule {
    let only = ViewStateBuilder::new("only")
        .terminal()
        .render(|_| Value::Null)
        .build()
        .unwrap();
    ProcessModuleBuilder::new("broken")
        .state(only)
        .init_sync(|_, _| anyhow::bail!("init exploded"))
        .build()
        .unwrap()
}

fn injected() -> ProcessModule {
    let show = ViewStateBuilder::new("show")
        .terminal()
        .render(|scope| json!({"customer": scope.and_then(|s| s.get("customer"))}))
        .build()
        .unwrap();
    ProcessModuleBuilder::new("injected")
        .state(show)
        .scope(ScopeDefinition::new().query("customer", "currentCustomer"))
        .start_at("show")
        .build()
        .unwrap()
}

fn importer() -> StaticImporter {
    StaticImporter::new()
        .with_module(orders())
        .with_module(picker())
        .with_module(broken())
        .with_module(injected())
}

struct Harness {
    engine: ProcessEngine,
    renderer: Arc<RecordingRenderer>,
    history: Arc<RecordingHistory>,
}

fn harness_with(config: EngineConfig, collaborators: Collaborators) -> Harness {
    let renderer = Arc::new(RecordingRenderer::default());
    let history = Arc::new(RecordingHistory::default());
    let collaborators = collaborators
        .with_renderer(renderer.clone())
        .with_history(history.clone());
    Harness {
        engine: ProcessEngine::new(config, collaborators),
        renderer,
        history,
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default(), Collaborators::new(importer()))
}

fn tracked(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Effect {
    let log = Arc::clone(log);
    Effect::new(move || {
        log.lock().push(format!("+{name}"));
        let log = Arc::clone(&log);
        Some(Box::new(move || log.lock().push(format!("-{name}"))) as Cleanup)
    })
}

fn state_of(engine: &ProcessEngine, id: ProcessId) -> Option<String> {
    engine
        .process(id)
        .and_then(|p| p.current_state())
        .map(str::to_string)
}

fn scope_count(engine: &ProcessEngine, id: ProcessId) -> i64 {
    count(engine.process(id).and_then(|p| p.scope()))
}

#[tokio::test]
async fn start_renders_first_state_and_pushes_navigation() {
    let mut h = harness();

    let id = h
        .engine
        .render_process("orders", json!({"filter": "open"}), ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(h.engine.current_id(), Some(id));
    assert_eq!(state_of(&h.engine, id).as_deref(), Some("list"));
    assert_eq!(h.engine.process(id).unwrap().input(), &json!({"filter": "open"}));
    assert_eq!(h.engine.navigation().len(), 1);
    assert_eq!(h.history.pushes.lock()[0].1, "/app/orders/list");
    match h.renderer.last() {
        Some(RenderOutput::View(frame)) => {
            assert_eq!(frame.state, "list");
            assert_eq!(frame.page_title.as_deref(), Some("Orders"));
            assert_eq!(frame.view, json!({"view": "list", "count": 0}));
        }
        other => panic!("unexpected render output: {other:?}"),
    }
}

#[tokio::test]
async fn transitions_record_navigation_and_history() {
    let mut h = harness();
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    let outcome = h.engine.transition(id, "count", Value::Null).await.unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Advanced {
            target: "list".to_string(),
            recorded: true
        }
    );
    assert_eq!(scope_count(&h.engine, id), 1);
    assert_eq!(h.engine.process(id).unwrap().history_pos(), 1);

    h.engine.transition(id, "open", Value::Null).await.unwrap();
    assert_eq!(state_of(&h.engine, id).as_deref(), Some("detail"));
    assert_eq!(h.engine.navigation().len(), 3);
    assert_eq!(h.engine.navigation().cursor(), Some(2));

    let err = h.engine.transition(id, "open", Value::Null).await.unwrap_err();
    assert!(matches!(err, ProcessError::UnknownTransition { .. }));
}

#[tokio::test]
async fn pop_restores_state_and_versioned_fields() {
    let mut h = harness();
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    h.engine.transition(id, "count", Value::Null).await.unwrap();
    h.engine.transition(id, "open", Value::Null).await.unwrap();

    let restored = h.engine.on_history_action(&h.history.state(0)).unwrap();
    assert_eq!(
        restored,
        HistoryRestore::Restored {
            index: 0,
            process_id: id
        }
    );
    assert_eq!(state_of(&h.engine, id).as_deref(), Some("list"));
    assert_eq!(scope_count(&h.engine, id), 0);

    let unchanged = h.engine.on_history_action(&h.history.state(0)).unwrap();
    assert_eq!(unchanged, HistoryRestore::Unchanged);

    h.engine.on_history_action(&h.history.state(2)).unwrap();
    assert_eq!(state_of(&h.engine, id).as_deref(), Some("detail"));
    assert_eq!(scope_count(&h.engine, id), 1);

    let unknown = NavigationState {
        navigation_id: Uuid::new_v4(),
    };
    assert_eq!(h.engine.on_history_action(&unknown).unwrap(), HistoryRestore::Gone);
    assert_eq!(h.renderer.last(), Some(RenderOutput::Gone));
}

#[tokio::test]
async fn unrecorded_edit_after_pop_drops_forward_entries() {
    let mut h = harness();
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    h.engine.transition(id, "count", Value::Null).await.unwrap();
    h.engine.transition(id, "count", Value::Null).await.unwrap();
    h.engine.on_history_action(&h.history.state(0)).unwrap();

    let outcome = h.engine.transition(id, "quiet", Value::Null).await.unwrap();

    assert_eq!(
        outcome,
        TransitionOutcome::Advanced {
            target: "list".to_string(),
            recorded: false
        }
    );
    assert_eq!(scope_count(&h.engine, id), 1);
    assert_eq!(h.engine.navigation().len(), 1);
    assert_eq!(
        h.engine.on_history_action(&h.history.state(2)).unwrap(),
        HistoryRestore::Gone
    );
    assert_eq!(scope_count(&h.engine, id), 1);
}

#[tokio::test]
async fn failed_action_rolls_back_scope() {
    let mut h = harness();
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    let renders = h.renderer.outputs.lock().len();

    let err = h.engine.transition(id, "fail", Value::Null).await.unwrap_err();

    match err {
        ProcessError::ActionFailed { transition, message } => {
            assert_eq!(transition, "fail");
            assert!(message.contains("backend unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(scope_count(&h.engine, id), 0);
    assert_eq!(h.engine.process(id).unwrap().history_pos(), 0);
    assert_eq!(h.engine.navigation().len(), 1);
    assert_eq!(h.renderer.outputs.lock().len(), renders);
}

#[tokio::test]
async fn declined_confirmation_keeps_state() {
    let mut h = harness_with(
        EngineConfig::default(),
        Collaborators::new(importer()).with_confirm(Decline),
    );
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    let outcome = h.engine.transition(id, "leave", Value::Null).await.unwrap();

    assert_eq!(outcome, TransitionOutcome::Declined);
    assert_eq!(state_of(&h.engine, id).as_deref(), Some("list"));
    assert_eq!(h.engine.navigation().len(), 1);
}

#[tokio::test]
async fn back_in_action_restores_and_moves_host_cursor() {
    let mut h = harness();
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    h.engine.transition(id, "count", Value::Null).await.unwrap();

    let outcome = h.engine.transition(id, "back", Value::Null).await.unwrap();

    assert_eq!(outcome, TransitionOutcome::HistoryBack { index: 0 });
    assert_eq!(scope_count(&h.engine, id), 0);
    assert_eq!(h.engine.navigation().cursor(), Some(0));
    assert_eq!(*h.history.moves.lock(), vec![-1]);
}

#[tokio::test]
async fn sub_process_resolves_parent_and_resumes_it() {
    let mut h = harness();
    let parent = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    let sub = h
        .engine
        .run_sub_process(parent, "picker", json!({"kind": "customer"}), ProcessOptions::default())
        .await
        .unwrap();
    let child = sub.id();
    assert_eq!(h.engine.current_id(), Some(child));
    assert!(h.engine.process(child).unwrap().is_sub_process());
    assert!(!h.engine.process(parent).unwrap().is_active());

    h.engine.end_sub_process(child, json!("C-1")).unwrap();

    assert_eq!(sub.finished().await.unwrap(), json!("C-1"));
    assert_eq!(h.engine.current_id(), Some(parent));
    assert!(h.engine.process(parent).unwrap().is_active());
    assert!(h.engine.process(child).unwrap().has_ended());
    assert_eq!(h.engine.processes().len(), 2);
    assert!(matches!(
        h.engine.end_sub_process(child, Value::Null),
        Err(ProcessError::AlreadyEnded(_))
    ));
    assert!(matches!(
        h.engine.end_sub_process(parent, Value::Null),
        Err(ProcessError::NotASubProcess(_))
    ));
}

#[tokio::test]
async fn paused_parent_rejects_transitions() {
    let mut h = harness();
    let parent = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    let sub = h
        .engine
        .run_sub_process(parent, "picker", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    let child = sub.id();
    let entries = h.engine.navigation().len();

    let err = h
        .engine
        .transition(parent, "open", Value::Null)
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::NotActive(id) if id == parent));
    assert_eq!(state_of(&h.engine, parent).as_deref(), Some("list"));
    assert_eq!(h.engine.current_id(), Some(child));
    assert_eq!(h.engine.navigation().len(), entries);
    assert_eq!(
        h.engine.navigation().current().map(|e| e.process_id),
        Some(child)
    );

    h.engine.end_sub_process(child, Value::Null).unwrap();
    let outcome = h.engine.transition(parent, "open", Value::Null).await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Advanced { ref target, .. } if target == "detail"));
}

#[tokio::test]
async fn aborted_sub_process_rejects() {
    let mut h = harness();
    let parent = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    let sub = h
        .engine
        .run_sub_process(parent, "picker", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    let child = sub.id();

    h.engine.abort_sub_process(child, json!("cancelled")).unwrap();

    match sub.finished().await {
        Err(ProcessError::SubProcessAborted { reason }) => assert_eq!(reason, json!("cancelled")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(h.engine.current_id(), Some(parent));
}

#[tokio::test]
async fn forced_sub_process_nests_under_current() {
    let mut h = harness();
    let parent = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    let options = ProcessOptions {
        force_sub_process: true,
        as_dialog: true,
        dialog: Some("Pick one".to_string()),
        ..ProcessOptions::default()
    };
    let child = h
        .engine
        .render_process("picker", Value::Null, options)
        .await
        .unwrap();

    assert_eq!(h.engine.process(child).unwrap().parent(), Some(parent));
    match h.renderer.last() {
        Some(RenderOutput::View(frame)) => {
            assert!(frame.as_dialog);
            assert_eq!(frame.dialog.as_deref(), Some("Pick one"));
        }
        other => panic!("unexpected render output: {other:?}"),
    }
}

#[tokio::test]
async fn effects_switch_with_the_active_process() {
    let mut h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    let parent = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    h.engine
        .add_effect(parent, None, tracked(&log, "orders"))
        .unwrap();

    let sub = h
        .engine
        .run_sub_process(parent, "picker", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    let child = sub.id();
    h.engine
        .add_effect(child, None, tracked(&log, "picker"))
        .unwrap();
    h.engine.end_sub_process(child, Value::Null).unwrap();

    assert_eq!(
        *log.lock(),
        vec!["+orders", "-orders", "+picker", "-picker", "+orders"]
    );

    // Land on the parent first, then POP forward into the ended sub-process.
    h.engine.on_history_action(&h.history.state(0)).unwrap();
    let restored = h.engine.on_history_action(&h.history.state(1)).unwrap();

    assert_eq!(
        restored,
        HistoryRestore::Restored {
            index: 1,
            process_id: child
        }
    );
    assert!(!h.engine.process(child).unwrap().has_ended());
    assert_eq!(
        *log.lock(),
        vec!["+orders", "-orders", "+picker", "-picker", "+orders", "-orders", "+picker"]
    );
}

#[tokio::test]
async fn view_effects_follow_the_current_state() {
    let mut h = harness();
    let log = Arc::new(Mutex::new(Vec::new()));
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    h.engine
        .add_effect(id, Some("detail"), tracked(&log, "detail"))
        .unwrap();
    assert!(log.lock().is_empty());

    h.engine.transition(id, "open", Value::Null).await.unwrap();
    assert_eq!(*log.lock(), vec!["+detail"]);

    h.engine.on_history_action(&h.history.state(0)).unwrap();
    assert_eq!(*log.lock(), vec!["+detail", "-detail"]);
}

#[tokio::test]
async fn pruned_entries_are_gone() {
    let config = EngineConfig::builder()
        .max_navigation_history(2)
        .build()
        .unwrap();
    let mut h = harness_with(config, Collaborators::new(importer()));
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();
    h.engine.transition(id, "count", Value::Null).await.unwrap();
    h.engine.transition(id, "count", Value::Null).await.unwrap();

    assert_eq!(h.engine.navigation().len(), 2);
    assert_eq!(
        h.engine.on_history_action(&h.history.state(0)).unwrap(),
        HistoryRestore::Gone
    );

    h.engine.on_history_action(&h.history.state(1)).unwrap();
    assert_eq!(scope_count(&h.engine, id), 1);
}

#[tokio::test]
async fn failed_start_renders_error_and_keeps_current() {
    let mut h = harness();
    let id = h
        .engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    let err = h
        .engine
        .render_process("broken", Value::Null, ProcessOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::ActionFailed { .. }));
    assert_eq!(h.engine.current_id(), Some(id));
    assert!(matches!(
        h.renderer.last(),
        Some(RenderOutput::Error { process, .. }) if process == "broken"
    ));

    let err = h
        .engine
        .render_process("missing", Value::Null, ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Import { .. }));
    assert_eq!(h.engine.current_id(), Some(id));
}

#[tokio::test]
async fn injections_fill_the_scope() {
    let mut injections = Map::new();
    injections.insert("currentCustomer".to_string(), json!({"name": "Ada"}));
    let mut h = harness_with(
        EngineConfig::default(),
        Collaborators::new(importer()).with_injections(FixedInjections(injections)),
    );

    let id = h
        .engine
        .render_process("injected", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    let scope = h.engine.process(id).and_then(|p| p.scope()).unwrap();
    assert_eq!(scope.get("customer"), Some(json!({"name": "Ada"})));

    let mut h = harness();
    let err = h
        .engine
        .render_process("injected", Value::Null, ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::InjectionNotFound { .. }));
}

#[tokio::test]
async fn reset_forgets_everything() {
    let mut h = harness();
    h.engine
        .render_process("orders", Value::Null, ProcessOptions::default())
        .await
        .unwrap();

    h.engine.reset();

    assert!(h.engine.processes().is_empty());
    assert!(h.engine.navigation().is_empty());
    assert_eq!(h.engine.current_id(), None);
}
