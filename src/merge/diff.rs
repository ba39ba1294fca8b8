//! Diff records and their computation.
//!
//! The first pass reports changed scalar fields and merge groups per entity. The
//! second pass synthesizes a "list changed" entry on every collection that owns a
//! created or deleted many-to-many link row, because the owning object itself
//! may have no direct field change at all.

use super::domain::{entity_key, DomainObject, TypedValue, TYPE_FIELD};
use super::error::MergeError;
use super::plan::MergePlan;
use super::working_set::{EntryStatus, WorkingSetEntry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Type tag of synthesized many-to-many collection values.
pub const DOMAIN_OBJECT_LIST_TYPE: &str = "[DomainObject]";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldValueChange {
    pub field: String,
    pub value: TypedValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub id: TypedValue,
    /// Version the change is based on; `None` for new objects.
    pub version: Option<Value>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub changes: Vec<FieldValueChange>,
    pub new: bool,
}

impl EntityChange {
    pub fn field(&self, name: &str) -> Option<&FieldValueChange> {
        self.changes.iter().find(|c| c.field == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDeletion {
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: Option<Value>,
    pub id: TypedValue,
}

/// Everything a merge request carries besides the merge configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeDiff {
    pub changes: Vec<EntityChange>,
    pub deletions: Vec<EntityDeletion>,
}

impl MergeDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletions.is_empty()
    }

    pub fn change(&self, type_name: &str, id: &Value) -> Option<&EntityChange> {
        self.changes
            .iter()
            .find(|c| c.type_name == type_name && &c.id.value == id)
    }
}

pub(crate) type Entries = BTreeMap<String, WorkingSetEntry>;
type Bases = BTreeMap<String, Option<DomainObject>>;

fn type_of(object: &DomainObject) -> Result<&str, MergeError> {
    object
        .type_name()
        .ok_or_else(|| MergeError::MissingIdentity(format!("missing '{TYPE_FIELD}'")))
}

/// Changed fields of one object. Absent current values are never reported, so
/// clearing a field requires an explicit `null`.
pub(crate) fn entity_field_changes(
    plan: &MergePlan,
    object: &DomainObject,
    base: Option<&DomainObject>,
    is_new: bool,
) -> Result<Vec<FieldValueChange>, MergeError> {
    let info = plan.info(type_of(object)?)?;
    let differs = |field: &str| match object.get(field) {
        Some(current) => is_new || base.and_then(|b| b.get(field)) != Some(current),
        None => false,
    };

    let mut changes = Vec::new();
    for group in &info.group_fields {
        if is_new || group.iter().any(|f| differs(&f.name)) {
            changes.extend(group.iter().map(|f| FieldValueChange {
                field: f.name.clone(),
                value: TypedValue::new(
                    f.type_name.clone(),
                    object.get(&f.name).cloned().unwrap_or(Value::Null),
                ),
            }));
        }
    }
    for field in info.scalar_fields.iter().filter(|f| differs(&f.name)) {
        changes.push(FieldValueChange {
            field: field.name.clone(),
            value: TypedValue::new(
                field.type_name.clone(),
                object.get(&field.name).cloned().unwrap_or(Value::Null),
            ),
        });
    }
    Ok(changes)
}

fn typed_id(plan: &MergePlan, object: &DomainObject) -> Result<TypedValue, MergeError> {
    let info = plan.info(type_of(object)?)?;
    Ok(TypedValue::new(
        info.id_type.clone(),
        object.get(plan.id_field()).cloned().unwrap_or(Value::Null),
    ))
}

fn version_of(
    plan: &MergePlan,
    object: &DomainObject,
    base: Option<&DomainObject>,
    is_new: bool,
) -> Option<Value> {
    if is_new {
        return None;
    }
    base.and_then(|b| b.get(plan.version_field()))
        .or_else(|| object.get(plan.version_field()))
        .filter(|v| !v.is_null())
        .cloned()
}

fn base_of<'a>(bases: &'a Bases, key: &str) -> Option<&'a DomainObject> {
    bases.get(key).and_then(Option::as_ref)
}

/// First pass: one record per NEW or MODIFIED entity with at least one change.
pub(crate) fn field_changes(
    plan: &MergePlan,
    entries: &Entries,
    bases: &Bases,
) -> Result<Vec<EntityChange>, MergeError> {
    let mut changes = Vec::new();
    for (key, entry) in entries {
        let is_new = match entry.status {
            EntryStatus::New => true,
            EntryStatus::Modified => false,
            EntryStatus::Deleted | EntryStatus::Registered => continue,
        };
        let base = base_of(bases, key);
        let fields = entity_field_changes(plan, &entry.object, base, is_new)?;
        if fields.is_empty() {
            continue;
        }
        changes.push(EntityChange {
            id: typed_id(plan, &entry.object)?,
            version: version_of(plan, &entry.object, base, is_new),
            type_name: type_of(&entry.object)?.to_string(),
            changes: fields,
            new: is_new,
        });
    }
    Ok(changes)
}

/// Reduce link rows to their own fields, dropping embedded objects.
pub(crate) fn simplify_list(plan: &MergePlan, objects: &[DomainObject]) -> Value {
    let simplified = objects
        .iter()
        .map(|object| {
            let mut fields = Map::new();
            let info = object.type_name().and_then(|t| plan.info(t).ok());
            for (name, value) in object.fields() {
                let keep = match &info {
                    Some(info) => {
                        name == TYPE_FIELD
                            || name == plan.version_field()
                            || info.field_type(name).is_some()
                    }
                    None => !value.is_object() && !value.is_array(),
                };
                if keep {
                    fields.insert(name.clone(), value.clone());
                }
            }
            Value::Object(fields)
        })
        .collect();
    Value::Array(simplified)
}

pub(crate) fn find_owner<'a>(
    plan: &MergePlan,
    entries: &'a Entries,
    owner_type: &str,
    target_field: &str,
    foreign_key: &Value,
) -> Option<(&'a String, &'a WorkingSetEntry)> {
    if target_field == plan.id_field() {
        let key = entity_key(owner_type, foreign_key);
        return entries.get_key_value(&key);
    }
    entries.iter().find(|(_, entry)| {
        entry.object.type_name() == Some(owner_type)
            && entry.object.get(target_field) == Some(foreign_key)
    })
}

/// Second pass: "list changed" entries for collections owning NEW or DELETED
/// link rows. Merged into an existing record of the owner when there is one.
pub(crate) fn many_to_many_changes(
    plan: &MergePlan,
    entries: &Entries,
    bases: &Bases,
    changes: &mut Vec<EntityChange>,
) -> Result<(), MergeError> {
    let mut seen = BTreeSet::new();
    for entry in entries.values() {
        if !matches!(entry.status, EntryStatus::New | EntryStatus::Deleted) {
            continue;
        }
        let link_type = type_of(&entry.object)?;
        for reference in plan.link_references(link_type) {
            let Some(foreign_key) = entry.object.get(&reference.relation.source_field) else {
                continue;
            };
            let Some((owner_key, owner)) = find_owner(
                plan,
                entries,
                &reference.owner_type,
                &reference.relation.target_field,
                foreign_key,
            ) else {
                continue;
            };
            if owner.status == EntryStatus::Deleted
                || !seen.insert((owner_key.clone(), reference.field.clone()))
            {
                continue;
            }

            let list = FieldValueChange {
                field: reference.field.clone(),
                value: TypedValue::new(
                    DOMAIN_OBJECT_LIST_TYPE,
                    simplify_list(plan, &owner.object.objects(&reference.field)),
                ),
            };
            let owner_id = typed_id(plan, &owner.object)?;
            match changes
                .iter_mut()
                .find(|c| c.type_name == reference.owner_type && c.id.value == owner_id.value)
            {
                Some(existing) => {
                    if existing.field(&reference.field).is_none() {
                        existing.changes.push(list);
                    }
                }
                None => {
                    let is_new = owner.status == EntryStatus::New;
                    changes.push(EntityChange {
                        id: owner_id,
                        version: version_of(plan, &owner.object, base_of(bases, owner_key), is_new),
                        type_name: reference.owner_type.clone(),
                        changes: vec![list],
                        new: is_new,
                    });
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn deletions(
    plan: &MergePlan,
    entries: &Entries,
    bases: &Bases,
) -> Result<Vec<EntityDeletion>, MergeError> {
    entries
        .iter()
        .filter(|(_, entry)| entry.status == EntryStatus::Deleted)
        .map(|(key, entry)| {
            Ok(EntityDeletion {
                type_name: type_of(&entry.object)?.to_string(),
                version: version_of(plan, &entry.object, base_of(bases, key), false),
                id: typed_id(plan, &entry.object)?,
            })
        })
        .collect()
}
