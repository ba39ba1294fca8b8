//! Change tracking for domain objects edited during one session.
//!
//! A [`WorkingSet`] keeps two maps keyed by `"<type>:<id>"`: the tracked current
//! version of every object with its [`EntryStatus`], and the base version the
//! server last saw (`None` for objects created locally). Diffs are always
//! computed between the two, guided by the [`MergePlan`].
//!
//! Invariants:
//! - every MODIFIED or DELETED key has a base version
//! - a key has exactly one status
//! - deleting a NEW object forgets it instead of recording a deletion

use super::diff::{self, MergeDiff};
use super::domain::{entity_key, DomainObject, TYPE_FIELD};
use super::error::MergeError;
use super::plan::{EmbeddedField, MergePlan};
use super::protocol::{CancelResolver, ConflictResolver, MergeEndpoint};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Created locally; the server has never seen it.
    New,
    /// Tracked for changes against its base version.
    Modified,
    /// Scheduled for deletion.
    Deleted,
    /// Known base version, not tracked for changes.
    Registered,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkingSetEntry {
    pub object: DomainObject,
    pub status: EntryStatus,
}

impl WorkingSetEntry {
    fn new(object: DomainObject, status: EntryStatus) -> Self {
        Self { object, status }
    }

    pub(super) fn registered(object: DomainObject) -> Self {
        Self::new(object, EntryStatus::Registered)
    }
}

/// Veto hook run before every merge attempt; `false` cancels the merge.
pub type BeforeMergeHook = Arc<dyn Fn(&WorkingSet, u32) -> bool + Send + Sync>;

/// Replaces the default DISCARD behaviour.
pub type DiscardHook = Arc<dyn Fn(&mut WorkingSet) + Send + Sync>;

#[derive(Default)]
struct Memo {
    revision: u64,
    modified: HashMap<String, bool>,
    new_objects: Option<Vec<DomainObject>>,
}

impl Memo {
    fn sync(&mut self, revision: u64) {
        if self.revision != revision {
            *self = Memo {
                revision,
                ..Memo::default()
            };
        }
    }
}

/// Tracked base and current versions of domain objects.
///
/// # Example
///
/// ```
/// use flowstate::merge::{DomainObject, FieldDef, MergePlan, Schema, WorkingSet};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let schema = Schema::default().with_type(
///     "Foo",
///     vec![FieldDef::scalar("id", "String"), FieldDef::scalar("name", "String")],
/// );
/// let mut ws = WorkingSet::new(Arc::new(MergePlan::new(schema)));
///
/// let foo = DomainObject::new("Foo").with("id", json!("F1")).with("name", json!("a"));
/// ws.register_base_version(&foo, true, true).unwrap();
/// assert!(!ws.is_modified("Foo", &json!("F1")).unwrap());
///
/// ws.add_changes(&foo.clone().with("name", json!("b")), true, false).unwrap();
/// assert!(ws.is_modified("Foo", &json!("F1")).unwrap());
/// assert_eq!(ws.diff().unwrap().changes.len(), 1);
/// ```
pub struct WorkingSet {
    pub(super) plan: Arc<MergePlan>,
    pub(super) entries: BTreeMap<String, WorkingSetEntry>,
    pub(super) bases: BTreeMap<String, Option<DomainObject>>,
    revision: u64,
    memo: Mutex<Memo>,
    pub(super) endpoint: Option<Arc<dyn MergeEndpoint>>,
    pub(super) resolver: Arc<dyn ConflictResolver>,
    pub(super) before_merge: Option<BeforeMergeHook>,
    pub(super) on_discard: Option<DiscardHook>,
}

impl fmt::Debug for WorkingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingSet")
            .field("entries", &self.entries)
            .field("bases", &self.bases)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl WorkingSet {
    pub fn new(plan: Arc<MergePlan>) -> Self {
        Self {
            plan,
            entries: BTreeMap::new(),
            bases: BTreeMap::new(),
            revision: 0,
            memo: Mutex::new(Memo::default()),
            endpoint: None,
            resolver: Arc::new(CancelResolver),
            before_merge: None,
            on_discard: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn MergeEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_before_merge<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkingSet, u32) -> bool + Send + Sync + 'static,
    {
        self.before_merge = Some(Arc::new(hook));
        self
    }

    pub fn with_on_discard<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut WorkingSet) + Send + Sync + 'static,
    {
        self.on_discard = Some(Arc::new(hook));
        self
    }

    pub fn plan(&self) -> &MergePlan {
        &self.plan
    }

    /// Bumped on every mutation of the tracked state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(super) fn touch(&mut self) {
        self.revision += 1;
    }

    pub(super) fn key(&self, object: &DomainObject) -> Result<String, MergeError> {
        let key = object.key(self.plan.id_field())?;
        if let Some(type_name) = object.type_name() {
            self.plan.info(type_name)?;
        }
        Ok(key)
    }

    /// Snapshot `object` as its base version, once per key.
    ///
    /// With `follow_relations` the related objects are registered as well: to-one
    /// targets recursively, many-to-many link rows and their other-side objects
    /// without recursion. With `track_changes` the object is also handed to
    /// [`add_changes`](Self::add_changes), on every call.
    pub fn register_base_version(
        &mut self,
        object: &DomainObject,
        follow_relations: bool,
        track_changes: bool,
    ) -> Result<(), MergeError> {
        let key = self.key(object)?;
        if !self.bases.contains_key(&key) {
            self.bases.insert(key.clone(), Some(object.clone()));
            self.entries
                .entry(key.clone())
                .or_insert_with(|| WorkingSetEntry::new(object.clone(), EntryStatus::Registered));
            self.touch();
            tracing::debug!(key = %key, "base version registered");
            if follow_relations {
                self.register_related(object)?;
            }
        }
        if track_changes {
            self.add_changes(object, follow_relations, false)?;
        }
        Ok(())
    }

    fn register_related(&mut self, object: &DomainObject) -> Result<(), MergeError> {
        let Some(type_name) = object.type_name() else {
            return Ok(());
        };
        let info = self.plan.info(type_name)?;
        for field in &info.embedded {
            if field.is_many_to_many {
                for link in object.objects(&field.name) {
                    self.register_base_version(&link, false, false)?;
                    if let Some(other) = other_side(field, &link) {
                        self.register_base_version(&other, false, false)?;
                    }
                }
            } else if field.is_to_one() {
                if let Some(target) = object.object(&field.name) {
                    self.register_base_version(&target, true, false)?;
                }
            }
        }
        Ok(())
    }

    /// Track a locally created object.
    pub fn add_new(&mut self, object: &DomainObject) -> Result<(), MergeError> {
        let key = self.key(object)?;
        if self.entries.contains_key(&key) {
            return Err(MergeError::DuplicateIdentity(key));
        }
        self.entries
            .insert(key.clone(), WorkingSetEntry::new(object.clone(), EntryStatus::New));
        self.bases.insert(key.clone(), None);
        self.touch();
        tracing::debug!(key = %key, "new object tracked");

        let mut visited = HashSet::from([key]);
        self.add_relation_changes(object, None, &mut visited, true)
    }

    /// Record `object` as the current version of a tracked object.
    ///
    /// Fails with [`MergeError::NoBaseVersion`] for untracked objects unless
    /// `allow_unregistered` is set, in which case the object becomes NEW.
    pub fn add_changes(
        &mut self,
        object: &DomainObject,
        follow_relations: bool,
        allow_unregistered: bool,
    ) -> Result<(), MergeError> {
        let mut visited = HashSet::new();
        self.add_changes_inner(object, follow_relations, allow_unregistered, &mut visited)
    }

    fn add_changes_inner(
        &mut self,
        object: &DomainObject,
        follow_relations: bool,
        allow_unregistered: bool,
        visited: &mut HashSet<String>,
    ) -> Result<(), MergeError> {
        let key = self.key(object)?;
        if !visited.insert(key.clone()) {
            return Ok(());
        }

        let status = self.entries.get(&key).map(|e| e.status);
        let previous = match status {
            None if allow_unregistered => {
                self.entries
                    .insert(key.clone(), WorkingSetEntry::new(object.clone(), EntryStatus::New));
                self.bases.insert(key.clone(), None);
                None
            }
            None => return Err(MergeError::NoBaseVersion(key)),
            Some(EntryStatus::Deleted) => return Ok(()),
            Some(status) => {
                if status == EntryStatus::New {
                    self.bases.insert(key.clone(), Some(object.clone()));
                }
                self.entries.get_mut(&key).map(|entry| {
                    if status != EntryStatus::New {
                        entry.status = EntryStatus::Modified;
                    }
                    std::mem::replace(&mut entry.object, object.clone())
                })
            }
        };
        self.touch();

        if follow_relations {
            self.add_relation_changes(object, previous.as_ref(), visited, true)?;
        }
        Ok(())
    }

    /// Walk the embedded relations of `object`.
    ///
    /// Many-to-many links are only ever created or deleted, never updated: rows
    /// missing from the current collection (compared with the base and the
    /// previous current version) are deleted, unseen rows become NEW. Unseen
    /// to-one targets are registered as bases; known ones cascade when `cascade`
    /// is set.
    pub(super) fn add_relation_changes(
        &mut self,
        object: &DomainObject,
        previous: Option<&DomainObject>,
        visited: &mut HashSet<String>,
        cascade: bool,
    ) -> Result<(), MergeError> {
        let Some(type_name) = object.type_name() else {
            return Ok(());
        };
        let info = self.plan.info(type_name)?;
        let key = self.key(object)?;

        for field in &info.embedded {
            if field.is_many_to_many {
                let current = object.objects(&field.name);
                let current_keys = current
                    .iter()
                    .map(|link| self.key(link))
                    .collect::<Result<HashSet<_>, _>>()?;

                let base_links = self
                    .bases
                    .get(&key)
                    .and_then(Option::as_ref)
                    .map(|base| base.objects(&field.name))
                    .unwrap_or_default();
                let previous_links = previous
                    .map(|p| p.objects(&field.name))
                    .unwrap_or_default();
                for link in base_links.into_iter().chain(previous_links) {
                    if !current_keys.contains(&self.key(&link)?) {
                        self.mark_deleted(&link)?;
                    }
                }
                for link in &current {
                    self.link(field, link)?;
                }
            } else if field.is_to_one() {
                let Some(target) = object.object(&field.name) else {
                    continue;
                };
                let target_key = self.key(&target)?;
                if !self.entries.contains_key(&target_key) {
                    self.register_base_version(&target, true, false)?;
                } else if cascade {
                    self.add_changes_inner(&target, true, false, visited)?;
                }
            }
        }
        Ok(())
    }

    fn link(&mut self, field: &EmbeddedField, link: &DomainObject) -> Result<(), MergeError> {
        let key = self.key(link)?;
        match self.entries.get(&key).map(|e| e.status) {
            None => {
                self.entries
                    .insert(key.clone(), WorkingSetEntry::new(link.clone(), EntryStatus::New));
                self.bases.insert(key.clone(), None);
                self.touch();
                tracing::debug!(key = %key, "link row created");
            }
            Some(EntryStatus::Deleted) => {
                let restored = self
                    .bases
                    .get(&key)
                    .and_then(Option::clone)
                    .unwrap_or_else(|| link.clone());
                self.entries
                    .insert(key.clone(), WorkingSetEntry::new(restored, EntryStatus::Registered));
                self.touch();
                tracing::debug!(key = %key, "link row restored");
            }
            Some(_) => {}
        }
        if let Some(other) = other_side(field, link) {
            if !self.entries.contains_key(&self.key(&other)?) {
                self.register_base_version(&other, false, false)?;
            }
        }
        Ok(())
    }

    /// Schedule `object` for deletion. A NEW object is forgotten instead.
    pub fn mark_deleted(&mut self, object: &DomainObject) -> Result<(), MergeError> {
        let key = self.key(object)?;
        match self.entries.get(&key).map(|e| e.status) {
            Some(EntryStatus::New) => {
                self.entries.remove(&key);
                self.bases.remove(&key);
                tracing::debug!(key = %key, "new object reverted");
            }
            Some(EntryStatus::Deleted) => return Ok(()),
            Some(_) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.status = EntryStatus::Deleted;
                }
                tracing::debug!(key = %key, "object deleted");
            }
            None => {
                self.bases.insert(key.clone(), Some(object.clone()));
                self.entries
                    .insert(key.clone(), WorkingSetEntry::new(object.clone(), EntryStatus::Deleted));
                tracing::debug!(key = %key, "untracked object deleted");
            }
        }
        self.touch();
        Ok(())
    }

    /// Whether the object has changes the server has not seen.
    ///
    /// NEW objects always do. MODIFIED objects do when a scalar or group field
    /// differs from the base, or when a link row referencing them was created or
    /// deleted. Recomputed only after the working set changed.
    pub fn is_modified(&self, type_name: &str, id: &Value) -> Result<bool, MergeError> {
        let key = entity_key(type_name, id);
        {
            let mut memo = self.memo.lock();
            memo.sync(self.revision);
            if let Some(modified) = memo.modified.get(&key) {
                return Ok(*modified);
            }
        }
        let modified = self.compute_modified(&key, type_name)?;
        let mut memo = self.memo.lock();
        memo.sync(self.revision);
        memo.modified.insert(key, modified);
        Ok(modified)
    }

    pub fn is_object_modified(&self, object: &DomainObject) -> Result<bool, MergeError> {
        let type_name = object
            .type_name()
            .ok_or_else(|| MergeError::MissingIdentity(format!("missing '{TYPE_FIELD}'")))?;
        let id = object.get(self.plan.id_field()).cloned().unwrap_or(Value::Null);
        self.is_modified(type_name, &id)
    }

    fn compute_modified(&self, key: &str, type_name: &str) -> Result<bool, MergeError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(false);
        };
        match entry.status {
            EntryStatus::New => Ok(true),
            EntryStatus::Modified => {
                let base = self.bases.get(key).and_then(Option::as_ref);
                let changed = !diff::entity_field_changes(&self.plan, &entry.object, base, false)?
                    .is_empty();
                Ok(changed || self.has_link_changes(key, type_name))
            }
            EntryStatus::Deleted | EntryStatus::Registered => Ok(false),
        }
    }

    /// Whether a NEW or DELETED link row points at the entry under `key`, matched
    /// the same way the diff resolves the owner of a link row.
    fn has_link_changes(&self, key: &str, type_name: &str) -> bool {
        self.entries
            .values()
            .filter(|e| matches!(e.status, EntryStatus::New | EntryStatus::Deleted))
            .any(|e| {
                let Some(link_type) = e.object.type_name() else {
                    return false;
                };
                self.plan.link_references(link_type).iter().any(|r| {
                    if r.owner_type != type_name {
                        return false;
                    }
                    let Some(foreign_key) = e.object.get(&r.relation.source_field) else {
                        return false;
                    };
                    diff::find_owner(
                        &self.plan,
                        &self.entries,
                        &r.owner_type,
                        &r.relation.target_field,
                        foreign_key,
                    )
                    .is_some_and(|(owner_key, _)| owner_key == key)
                })
            })
    }

    /// Current versions of every NEW object.
    pub fn new_objects(&self) -> Vec<DomainObject> {
        let mut memo = self.memo.lock();
        memo.sync(self.revision);
        memo.new_objects
            .get_or_insert_with(|| {
                self.entries
                    .values()
                    .filter(|e| e.status == EntryStatus::New)
                    .map(|e| e.object.clone())
                    .collect()
            })
            .clone()
    }

    pub fn lookup(&self, type_name: &str, id: &Value) -> Option<&DomainObject> {
        self.entries
            .get(&entity_key(type_name, id))
            .map(|entry| &entry.object)
    }

    pub fn lookup_base(&self, type_name: &str, id: &Value) -> Option<&DomainObject> {
        self.bases
            .get(&entity_key(type_name, id))
            .and_then(Option::as_ref)
    }

    pub fn status(&self, type_name: &str, id: &Value) -> Option<EntryStatus> {
        self.entries
            .get(&entity_key(type_name, id))
            .map(|entry| entry.status)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &WorkingSetEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes and deletions to submit.
    pub fn diff(&self) -> Result<MergeDiff, MergeError> {
        let mut changes = diff::field_changes(&self.plan, &self.entries, &self.bases)?;
        diff::many_to_many_changes(&self.plan, &self.entries, &self.bases, &mut changes)?;
        let deletions = diff::deletions(&self.plan, &self.entries, &self.bases)?;
        Ok(MergeDiff { changes, deletions })
    }

    /// Re-derive link-row changes of every NEW or MODIFIED object.
    pub(super) fn refresh_relation_changes(&mut self) -> Result<(), MergeError> {
        let tracked: Vec<(String, DomainObject)> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.status, EntryStatus::New | EntryStatus::Modified))
            .map(|(key, e)| (key.clone(), e.object.clone()))
            .collect();
        for (key, object) in tracked {
            if !self.entries.contains_key(&key) {
                continue;
            }
            let mut visited = HashSet::from([key]);
            self.add_relation_changes(&object, None, &mut visited, false)?;
        }
        Ok(())
    }

    /// Revert every tracked object to its base version. NEW objects are dropped.
    pub fn discard(&mut self) {
        self.entries.retain(|_, entry| entry.status != EntryStatus::New);
        let entries = &self.entries;
        self.bases.retain(|key, _| entries.contains_key(key));
        for (key, entry) in self.entries.iter_mut() {
            if entry.status == EntryStatus::Registered {
                continue;
            }
            if let Some(Some(base)) = self.bases.get(key) {
                entry.object = base.clone();
            }
            entry.status = EntryStatus::Registered;
        }
        self.touch();
        tracing::info!(entries = self.entries.len(), "working set discarded");
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bases.clear();
        self.touch();
    }

    pub(crate) fn replace_state(
        &mut self,
        entries: BTreeMap<String, WorkingSetEntry>,
        bases: BTreeMap<String, Option<DomainObject>>,
    ) {
        self.entries = entries;
        self.bases = bases;
        self.touch();
    }

    pub(crate) fn state(
        &self,
    ) -> (
        &BTreeMap<String, WorkingSetEntry>,
        &BTreeMap<String, Option<DomainObject>>,
    ) {
        (&self.entries, &self.bases)
    }
}

/// Object on the far side of a many-to-many link row.
fn other_side(field: &EmbeddedField, link: &DomainObject) -> Option<DomainObject> {
    field
        .right_side_relation
        .as_ref()
        .and_then(|relation| relation.left_side_object.as_deref())
        .and_then(|name| link.object(name))
}
