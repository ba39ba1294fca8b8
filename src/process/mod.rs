//! Process engine: running processes, navigation and host integration.
//!
//! # Key Concepts
//!
//! - **Process**: a running instance of a [`ProcessModule`] with its own scope,
//!   current view state, change history and effects
//! - **Sub-process**: a process started with a parent; the parent is paused and
//!   awaits its result through a [`SubProcess`] handle
//! - **Navigation history**: one linear history across all processes, mirrored
//!   into the host history so POP events can restore earlier states
//! - **Collaborators**: importer, injection fetcher, renderer, host history and
//!   confirmation prompt, all supplied by the host

mod collaborators;
mod config;
mod effects;
mod engine;
mod error;
mod instance;
mod module;
mod navigation;

pub use collaborators::{
    AlwaysConfirm, Collaborators, ConfirmPrompt, HostHistory, InjectionFetcher, InjectionRequest,
    InjectionResponse, NoInjections, NullHistory, NullRenderer, ProcessImporter, RenderFrame,
    RenderOutput, Renderer, StaticImporter,
};
pub use config::{ConfigViolation, EngineConfig, EngineConfigBuilder};
pub use effects::{Cleanup, Effect, EffectRegistry};
pub use engine::{HistoryRestore, ProcessEngine, SubProcess};
pub use error::ProcessError;
pub use instance::{Process, ProcessOptions};
pub use module::{InitFn, InjectionQuery, ProcessModule, ScopeDefinition, StartState};
pub use navigation::{NavigationEntry, NavigationHistory, NavigationState};
