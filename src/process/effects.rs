//! Effect lifecycle bookkeeping for one process.
//!
//! Effects live in buckets keyed by view-state name. The `None` bucket holds
//! process-level effects that run for as long as the process is active; named
//! buckets run only while that view state is current.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Teardown returned by an effect's register function.
pub type Cleanup = Box<dyn FnOnce() + Send>;

type RegisterFn = Arc<dyn Fn() -> Option<Cleanup> + Send + Sync>;
type InputFn = Arc<dyn Fn() -> Vec<Value> + Send + Sync>;

/// A side effect bound to a process or one of its view states.
///
/// # Example
///
/// ```
/// use flowstate::process::{Effect, EffectRegistry};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let runs = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&runs);
/// let mut registry = EffectRegistry::default();
/// registry.add(
///     Some("edit"),
///     Effect::new(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///         None
///     }),
/// );
///
/// registry.register(Some("edit"));
/// registry.register(Some("edit"));
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Effect {
    register: RegisterFn,
    input: Option<InputFn>,
}

impl Effect {
    pub fn new<F>(register: F) -> Self
    where
        F: Fn() -> Option<Cleanup> + Send + Sync + 'static,
    {
        Self {
            register: Arc::new(register),
            input: None,
        }
    }

    /// Declare the inputs the effect depends on. A re-entered state re-runs the
    /// effect only when these changed.
    pub fn with_input<F>(mut self, input: F) -> Self
    where
        F: Fn() -> Vec<Value> + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(input));
        self
    }

    fn current_input(&self) -> Option<Vec<Value>> {
        self.input.as_ref().map(|input| input())
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

struct EffectEntry {
    effect: Effect,
    unregister: Option<Cleanup>,
    active: bool,
    last_input: Option<Vec<Value>>,
}

impl EffectEntry {
    fn start(&mut self, input: Option<Vec<Value>>) {
        self.unregister = (self.effect.register)();
        self.last_input = input;
        self.active = true;
    }

    fn stop(&mut self) {
        if let Some(cleanup) = self.unregister.take() {
            cleanup();
        }
        self.active = false;
    }
}

/// Effects of one process, bucketed by view state.
#[derive(Default)]
pub struct EffectRegistry {
    buckets: HashMap<Option<String>, Vec<EffectEntry>>,
}

impl fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("buckets", &self.buckets.len())
            .field("active", &self.active_count())
            .finish()
    }
}

impl EffectRegistry {
    /// Add an effect without running it.
    pub fn add(&mut self, view: Option<&str>, effect: Effect) {
        self.buckets
            .entry(view.map(str::to_string))
            .or_default()
            .push(EffectEntry {
                effect,
                unregister: None,
                active: false,
                last_input: None,
            });
    }

    /// Run every inactive effect of the bucket. Active effects are re-run only
    /// when their declared inputs changed.
    pub fn register(&mut self, view: Option<&str>) {
        let Some(entries) = self.buckets.get_mut(&view.map(str::to_string)) else {
            return;
        };
        for entry in entries.iter_mut() {
            let input = entry.effect.current_input();
            if entry.active {
                if input.is_none() || input == entry.last_input {
                    continue;
                }
                entry.stop();
            }
            entry.start(input);
        }
    }

    pub fn unregister(&mut self, view: Option<&str>) {
        if let Some(entries) = self.buckets.get_mut(&view.map(str::to_string)) {
            entries.iter_mut().filter(|e| e.active).for_each(EffectEntry::stop);
        }
    }

    pub fn unregister_all(&mut self) {
        self.buckets
            .values_mut()
            .flat_map(|entries| entries.iter_mut())
            .filter(|e| e.active)
            .for_each(EffectEntry::stop);
    }

    pub fn active_count(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|entries| entries.iter())
            .filter(|e| e.active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn tracked(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Effect {
        let log = Arc::clone(log);
        Effect::new(move || {
            log.lock().push(format!("+{name}"));
            let log = Arc::clone(&log);
            Some(Box::new(move || log.lock().push(format!("-{name}"))) as Cleanup)
        })
    }

    #[test]
    fn register_and_unregister_run_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EffectRegistry::default();
        registry.add(None, tracked(&log, "a"));

        registry.register(None);
        assert_eq!(registry.active_count(), 1);
        registry.unregister(None);

        assert_eq!(*log.lock(), vec!["+a", "-a"]);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn buckets_are_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EffectRegistry::default();
        registry.add(None, tracked(&log, "process"));
        registry.add(Some("edit"), tracked(&log, "edit"));

        registry.register(Some("edit"));

        assert_eq!(*log.lock(), vec!["+edit"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn changed_input_reruns_active_effect() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let input = Arc::new(Mutex::new(json!(1)));
        let source = Arc::clone(&input);
        let mut registry = EffectRegistry::default();
        registry.add(
            Some("edit"),
            tracked(&log, "e").with_input(move || vec![source.lock().clone()]),
        );

        registry.register(Some("edit"));
        registry.register(Some("edit"));
        assert_eq!(*log.lock(), vec!["+e"]);

        *input.lock() = json!(2);
        registry.register(Some("edit"));
        assert_eq!(*log.lock(), vec!["+e", "-e", "+e"]);
    }

    #[test]
    fn unregister_all_stops_every_bucket() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EffectRegistry::default();
        registry.add(None, tracked(&log, "p"));
        registry.add(Some("s"), tracked(&log, "s"));
        registry.register(None);
        registry.register(Some("s"));

        registry.unregister_all();

        assert_eq!(registry.active_count(), 0);
        assert!(log.lock().contains(&"-p".to_string()));
        assert!(log.lock().contains(&"-s".to_string()));
    }
}
