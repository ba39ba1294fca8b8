//! Observable process model.
//!
//! A `Scope` is the model a process operates on: a set of named fields holding
//! JSON values. Observers register against the scope and receive exactly one
//! [`ScopeUpdate`] per committed unit of mutation. Mutations performed inside a
//! [`ScopeBatch`] are buffered and either delivered together on `commit()` or
//! undone on `rollback()`, so observers never see a partially applied batch.
//!
//! # Example
//!
//! ```rust
//! use flowstate::core::Scope;
//! use serde_json::json;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let scope = Scope::new();
//! let updates = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&updates);
//! scope.observe(move |_update| {
//!     seen.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! let batch = scope.begin_batch();
//! scope.set("v_name", json!("Alice"));
//! scope.set("v_age", json!(42));
//! batch.commit();
//!
//! assert_eq!(updates.load(Ordering::SeqCst), 1);
//! assert_eq!(scope.get("v_age"), Some(json!(42)));
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A single field mutation. `None` stands for an absent field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// All changes of one committed unit of mutation, in mutation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopeUpdate {
    pub changes: Vec<FieldChange>,
    /// Scope revision after this update.
    pub revision: u64,
}

/// Handle returned by [`Scope::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&ScopeUpdate) + Send + Sync>;
type Delivery = (ScopeUpdate, Vec<Observer>);

struct ScopeInner {
    fields: Map<String, Value>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
    depth: usize,
    pending: Vec<FieldChange>,
    revision: u64,
}

impl ScopeInner {
    fn flush(&mut self) -> Option<Delivery> {
        if self.pending.is_empty() {
            return None;
        }
        self.revision += 1;
        let update = ScopeUpdate {
            changes: std::mem::take(&mut self.pending),
            revision: self.revision,
        };
        let observers = self.observers.iter().map(|(_, o)| Arc::clone(o)).collect();
        Some((update, observers))
    }

    fn restore(&mut self, change: FieldChange) {
        match change.old_value {
            Some(value) => {
                self.fields.insert(change.name, value);
            }
            None => {
                self.fields.remove(&change.name);
            }
        }
    }
}

fn deliver(delivery: Option<Delivery>) {
    if let Some((update, observers)) = delivery {
        for observer in observers {
            observer(&update);
        }
    }
}

/// Shared, observable field store. Cloning yields another handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Mutex<ScopeInner>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Scope")
            .field("fields", &inner.fields)
            .field("revision", &inner.revision)
            .finish()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::from_fields(Map::new())
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScopeInner {
                fields,
                observers: Vec::new(),
                next_observer: 0,
                depth: 0,
                pending: Vec::new(),
                revision: 0,
            })),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.lock().fields.get(name).cloned()
    }

    /// Copy of every field currently held.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.lock().fields.clone()
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// Write a field. Writing the value a field already holds is not a change.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.write(name.into(), Some(value));
    }

    pub fn remove(&self, name: &str) {
        self.write(name.to_string(), None);
    }

    /// Write several fields as one update.
    pub fn apply<I>(&self, writes: I)
    where
        I: IntoIterator<Item = (String, Option<Value>)>,
    {
        let batch = self.begin_batch();
        for (name, value) in writes {
            self.write(name, value);
        }
        batch.commit();
    }

    fn write(&self, name: String, value: Option<Value>) {
        let delivery = {
            let mut inner = self.inner.lock();
            let old_value = match &value {
                Some(v) => inner.fields.insert(name.clone(), v.clone()),
                None => inner.fields.remove(&name),
            };
            if old_value == value {
                return;
            }
            inner.pending.push(FieldChange {
                name,
                old_value,
                new_value: value,
            });
            if inner.depth > 0 {
                None
            } else {
                inner.flush()
            }
        };
        deliver(delivery);
    }

    /// Register an observer. It is invoked with no scope lock held, so it may
    /// read the scope, but it must not expect to see uncommitted batches.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ScopeUpdate) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = ObserverId(inner.next_observer);
        inner.next_observer += 1;
        inner.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(observer, _)| *observer != id);
        inner.observers.len() != before
    }

    /// Start buffering mutations. Batches nest; only the outermost commit delivers.
    pub fn begin_batch(&self) -> ScopeBatch {
        let mut inner = self.inner.lock();
        inner.depth += 1;
        ScopeBatch {
            scope: self.clone(),
            start: inner.pending.len(),
            finished: false,
        }
    }

    pub fn is_batching(&self) -> bool {
        self.inner.lock().depth > 0
    }

    pub fn same_scope(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn end_batch(&self) {
        let delivery = {
            let mut inner = self.inner.lock();
            inner.depth = inner.depth.saturating_sub(1);
            if inner.depth == 0 {
                inner.flush()
            } else {
                None
            }
        };
        deliver(delivery);
    }

    fn rollback_batch(&self, start: usize) {
        let mut inner = self.inner.lock();
        let undone: Vec<FieldChange> = inner.pending.drain(start..).collect();
        for change in undone.into_iter().rev() {
            inner.restore(change);
        }
        inner.depth = inner.depth.saturating_sub(1);
    }
}

/// Guard for a batched unit of mutation.
///
/// Dropping the guard without calling [`ScopeBatch::commit`] rolls the batch back.
#[must_use = "a batch that is dropped is rolled back"]
pub struct ScopeBatch {
    scope: Scope,
    start: usize,
    finished: bool,
}

impl ScopeBatch {
    pub fn commit(mut self) {
        self.finished = true;
        self.scope.end_batch();
    }

    pub fn rollback(mut self) {
        self.finished = true;
        self.scope.rollback_batch(self.start);
    }
}

impl Drop for ScopeBatch {
    fn drop(&mut self) {
        if !self.finished {
            self.scope.rollback_batch(self.start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording(scope: &Scope) -> Arc<Mutex<Vec<ScopeUpdate>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        scope.observe(move |update| sink.lock().push(update.clone()));
        log
    }

    #[test]
    fn set_outside_batch_notifies_immediately() {
        let scope = Scope::new();
        let log = recording(&scope);

        scope.set("a", json!(1));
        scope.set("b", json!(2));

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].changes[0].name, "a");
        assert_eq!(log[0].changes[0].old_value, None);
        assert_eq!(log[1].revision, 2);
    }

    #[test]
    fn writing_same_value_is_not_a_change() {
        let scope = Scope::new();
        scope.set("a", json!(1));
        let log = recording(&scope);

        scope.set("a", json!(1));

        assert!(log.lock().is_empty());
        assert_eq!(scope.revision(), 1);
    }

    #[test]
    fn batch_delivers_one_update() {
        let scope = Scope::new();
        let log = recording(&scope);

        let batch = scope.begin_batch();
        scope.set("a", json!(1));
        scope.set("b", json!(2));
        assert!(log.lock().is_empty());
        batch.commit();

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].changes.len(), 2);
    }

    #[test]
    fn rollback_restores_fields_and_notifies_nothing() {
        let scope = Scope::new();
        scope.set("a", json!("before"));
        let log = recording(&scope);

        let batch = scope.begin_batch();
        scope.set("a", json!("during"));
        scope.set("b", json!(true));
        batch.rollback();

        assert!(log.lock().is_empty());
        assert_eq!(scope.get("a"), Some(json!("before")));
        assert_eq!(scope.get("b"), None);
        assert!(!scope.is_batching());
    }

    #[test]
    fn dropped_batch_rolls_back() {
        let scope = Scope::new();
        {
            let _batch = scope.begin_batch();
            scope.set("a", json!(1));
        }
        assert_eq!(scope.get("a"), None);
    }

    #[test]
    fn nested_batches_deliver_at_outermost_commit() {
        let scope = Scope::new();
        let log = recording(&scope);

        let outer = scope.begin_batch();
        scope.set("a", json!(1));
        let inner = scope.begin_batch();
        scope.set("b", json!(2));
        inner.commit();
        assert!(log.lock().is_empty());
        outer.commit();

        assert_eq!(log.lock().len(), 1);
        assert_eq!(log.lock()[0].changes.len(), 2);
    }

    #[test]
    fn inner_rollback_keeps_outer_changes() {
        let scope = Scope::new();
        let outer = scope.begin_batch();
        scope.set("a", json!(1));
        let inner = scope.begin_batch();
        scope.set("a", json!(2));
        inner.rollback();
        outer.commit();

        assert_eq!(scope.get("a"), Some(json!(1)));
    }

    #[test]
    fn unobserve_stops_delivery() {
        let scope = Scope::new();
        let log = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&log);
        let id = scope.observe(move |_| *sink.lock() += 1);

        scope.set("a", json!(1));
        assert!(scope.unobserve(id));
        scope.set("a", json!(2));

        assert_eq!(*log.lock(), 1);
        assert!(!scope.unobserve(id));
    }

    #[test]
    fn observer_may_read_scope() {
        let scope = Scope::new();
        let reader = scope.clone();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        scope.observe(move |_| *sink.lock() = reader.get("a"));

        scope.set("a", json!("x"));

        assert_eq!(*seen.lock(), Some(json!("x")));
    }
}
