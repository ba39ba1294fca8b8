//! External collaborators of the process engine.
//!
//! The engine never loads code, talks to the network or draws anything itself.
//! Those concerns are delegated to the traits in this module; each has a trivial
//! default so an engine can be assembled with only an importer.

use super::error::ProcessError;
use super::module::ProcessModule;
use super::navigation::NavigationState;
use crate::core::ProcessId;
use crate::transport::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves process names to process definitions.
#[async_trait]
pub trait ProcessImporter: Send + Sync {
    async fn import(&self, name: &str) -> Result<Arc<ProcessModule>, ProcessError>;
}

/// Importer backed by an in-memory registry.
#[derive(Debug, Default)]
pub struct StaticImporter {
    modules: HashMap<String, Arc<ProcessModule>>,
}

impl StaticImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: ProcessModule) -> Self {
        self.register(module);
        self
    }

    pub fn register(&mut self, module: ProcessModule) {
        self.modules
            .insert(module.name().to_string(), Arc::new(module));
    }
}

#[async_trait]
impl ProcessImporter for StaticImporter {
    async fn import(&self, name: &str) -> Result<Arc<ProcessModule>, ProcessError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::Import {
                name: name.to_string(),
                message: "no such process module".to_string(),
            })
    }
}

/// Body posted to the per-process injection endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InjectionRequest {
    pub app: String,
    pub process: String,
    pub input: Value,
}

/// `{ injections }` or `{ error }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionResponse {
    #[serde(default)]
    pub injections: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl InjectionResponse {
    /// Turn a synthesized `{ error }` payload into a rejection.
    pub fn into_result(self) -> Result<Map<String, Value>, TransportError> {
        match self.error {
            Some(error) => Err(TransportError::Rejected(error)),
            None => Ok(self.injections),
        }
    }
}

#[async_trait]
pub trait InjectionFetcher: Send + Sync {
    async fn fetch(&self, request: &InjectionRequest) -> Result<InjectionResponse, TransportError>;
}

/// Fetcher for hosts without server-provided data.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInjections;

#[async_trait]
impl InjectionFetcher for NoInjections {
    async fn fetch(&self, _request: &InjectionRequest) -> Result<InjectionResponse, TransportError> {
        Ok(InjectionResponse::default())
    }
}

/// Everything the view layer needs to draw the current state of a process.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderFrame {
    pub process_id: ProcessId,
    pub process: String,
    pub state: String,
    pub page_title: Option<String>,
    pub view: Value,
    pub layout: Option<String>,
    pub as_dialog: bool,
    pub dialog: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderOutput {
    View(RenderFrame),
    /// A process failed to start; shown in place of its first view.
    Error { process: String, message: String },
    /// Back-navigation targeted a history entry that no longer resolves.
    Gone,
}

pub trait Renderer: Send + Sync {
    fn render(&self, output: RenderOutput);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&self, _output: RenderOutput) {}
}

/// Host (browser) history integration.
pub trait HostHistory: Send + Sync {
    fn push(&self, state: NavigationState, uri: &str);
    fn go(&self, delta: isize);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullHistory;

impl HostHistory for NullHistory {
    fn push(&self, _state: NavigationState, _uri: &str) {}
    fn go(&self, _delta: isize) {}
}

/// Asks the user to confirm a transition.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmPrompt for AlwaysConfirm {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// The full set of collaborators an engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub importer: Arc<dyn ProcessImporter>,
    pub injections: Arc<dyn InjectionFetcher>,
    pub renderer: Arc<dyn Renderer>,
    pub history: Arc<dyn HostHistory>,
    pub confirm: Arc<dyn ConfirmPrompt>,
}

impl Collaborators {
    pub fn new(importer: impl ProcessImporter + 'static) -> Self {
        Self {
            importer: Arc::new(importer),
            injections: Arc::new(NoInjections),
            renderer: Arc::new(NullRenderer),
            history: Arc::new(NullHistory),
            confirm: Arc::new(AlwaysConfirm),
        }
    }

    pub fn with_injections(mut self, injections: impl InjectionFetcher + 'static) -> Self {
        self.injections = Arc::new(injections);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HostHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_confirm(mut self, confirm: impl ConfirmPrompt + 'static) -> Self {
        self.confirm = Arc::new(confirm);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_payload_rejects() {
        let response: InjectionResponse =
            serde_json::from_value(json!({"error": {"message": "denied"}})).unwrap();

        assert_eq!(
            response.into_result(),
            Err(TransportError::Rejected(json!({"message": "denied"})))
        );
    }

    #[test]
    fn injections_payload_resolves() {
        let response: InjectionResponse =
            serde_json::from_value(json!({"injections": {"orders": [1, 2]}})).unwrap();

        let injections = response.into_result().unwrap();
        assert_eq!(injections.get("orders"), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn static_importer_reports_unknown_names() {
        let importer = StaticImporter::new();
        let result = importer.import("missing").await;
        assert!(matches!(result, Err(ProcessError::Import { .. })));
    }
}
