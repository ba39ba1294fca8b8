//! The merge round trip and application of conflict resolutions.

use super::diff::{simplify_list, DOMAIN_OBJECT_LIST_TYPE};
use super::domain::{entity_key, DomainObject, TypedValue};
use super::error::MergeError;
use super::protocol::{
    Conflict, EntityReference, FieldStatus, MergeOperation, MergeRequest, Resolution,
};
use super::working_set::WorkingSetEntry;
use super::WorkingSet;
use serde_json::Value;
use std::sync::Arc;

impl WorkingSet {
    /// Submit the diff and drive conflict resolution until it settles.
    ///
    /// Returns [`MergeOperation::Store`] once the endpoint reports the merge as
    /// done (the working set is cleared), or the operation chosen by the
    /// resolver otherwise. A STORE decision applies the resolutions and submits
    /// again with the next attempt number.
    pub async fn merge(&mut self) -> Result<MergeOperation, MergeError> {
        let mut attempt = 1u32;
        loop {
            self.refresh_relation_changes()?;

            if let Some(hook) = self.before_merge.clone() {
                if !hook(self, attempt) {
                    tracing::info!(attempt, "merge vetoed");
                    return Ok(MergeOperation::Cancel);
                }
            }

            let diff = self.diff()?;
            let request = MergeRequest {
                changes: diff.changes,
                deletions: diff.deletions,
                merge_config: self.plan.schema().merge.clone(),
            };
            let endpoint = self.endpoint.clone().ok_or(MergeError::NoEndpoint)?;
            tracing::debug!(
                attempt,
                changes = request.changes.len(),
                deletions = request.deletions.len(),
                "submitting merge"
            );
            let response = match endpoint.merge(&request).await {
                Ok(response) => response,
                Err(error) => {
                    tracing::error!(attempt, error = %error, "merge submission failed");
                    return Err(MergeError::Network(error));
                }
            };

            if response.done {
                self.clear();
                tracing::info!(attempt, "merge done");
                return Ok(MergeOperation::Store);
            }

            let conflicts = self.prepare_conflicts(response.conflicts);
            let resolver = Arc::clone(&self.resolver);
            let decision = resolver.resolve(&conflicts).await?;
            let operation: MergeOperation = decision.operation.parse()?;
            tracing::info!(attempt, conflicts = conflicts.len(), operation = %operation, "merge conflicts resolved");

            match operation {
                MergeOperation::Cancel => return Ok(operation),
                MergeOperation::Discard => {
                    match self.on_discard.clone() {
                        Some(hook) => hook(self),
                        None => self.discard(),
                    }
                    return Ok(operation);
                }
                MergeOperation::Apply => {
                    self.apply(&decision.resolutions, &conflicts)?;
                    return Ok(operation);
                }
                MergeOperation::Store => {
                    self.apply(&decision.resolutions, &conflicts)?;
                    attempt += 1;
                }
            }
        }
    }

    /// Fill in `ours` values the server could not know, from the live objects.
    pub(super) fn prepare_conflicts(&self, conflicts: Vec<Conflict>) -> Vec<Conflict> {
        conflicts
            .into_iter()
            .map(|mut conflict| {
                let key = entity_key(&conflict.type_name, &conflict.id.value);
                let Some(entry) = self.entries.get(&key) else {
                    return conflict;
                };
                let info = self.plan.info(&conflict.type_name).ok();
                for field in conflict.fields.iter_mut().filter(|f| f.ours.is_none()) {
                    let many_to_many = info
                        .as_ref()
                        .and_then(|i| i.embedded_field(&field.name))
                        .filter(|e| e.is_many_to_many)
                        .is_some();
                    if many_to_many {
                        let rows = entry.object.objects(&field.name);
                        field.ours = Some(TypedValue::new(
                            DOMAIN_OBJECT_LIST_TYPE,
                            simplify_list(&self.plan, &rows),
                        ));
                    } else if let Some(value) = entry.object.get(&field.name) {
                        let type_name = info
                            .as_ref()
                            .and_then(|i| i.field_type(&field.name))
                            .unwrap_or("Object")
                            .to_string();
                        field.ours = Some(TypedValue::new(type_name, value.clone()));
                    }
                }
                conflict
            })
            .collect()
    }

    /// Write resolved values onto the live objects and the server's values onto
    /// the bases.
    ///
    /// OURS and VALUE fields change the live object; THEIRS fields leave it as it
    /// is. Every conflict's `theirs` values and version land in the base, so the
    /// next diff is computed against what the server holds now.
    pub fn apply(
        &mut self,
        resolutions: &[Resolution],
        conflicts: &[Conflict],
    ) -> Result<(), MergeError> {
        for resolution in resolutions {
            let key = entity_key(&resolution.type_name, &resolution.id.value);
            let info = self.plan.info(&resolution.type_name)?;
            let conflict = conflicts.iter().find(|c| {
                c.type_name == resolution.type_name && c.id.value == resolution.id.value
            });

            for field in &resolution.fields {
                let conflict_field = conflict.and_then(|c| c.field(&field.name));
                let value = match field.status {
                    FieldStatus::Ours => conflict_field
                        .and_then(|f| f.ours.as_ref())
                        .map(|v| v.value.clone()),
                    FieldStatus::Value => field.value.as_ref().map(|v| v.value.clone()),
                    FieldStatus::Theirs | FieldStatus::Undecided => None,
                };
                let Some(value) = value else {
                    continue;
                };
                if !self.entries.contains_key(&key) {
                    continue;
                }

                let many_to_many = info
                    .embedded_field(&field.name)
                    .map(|e| e.is_many_to_many)
                    .unwrap_or(false);
                let value = if many_to_many {
                    let references = conflict_field
                        .map(|f| f.references.as_slice())
                        .unwrap_or(&[]);
                    self.rebuild_links(&value, references)?
                } else {
                    value
                };
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.object.set(field.name.clone(), value);
                }
                tracing::debug!(key = %key, field = %field.name, status = ?field.status, "resolution applied");
            }
        }

        for conflict in conflicts {
            self.apply_theirs(conflict)?;
        }
        self.touch();
        Ok(())
    }

    fn apply_theirs(&mut self, conflict: &Conflict) -> Result<(), MergeError> {
        let key = entity_key(&conflict.type_name, &conflict.id.value);
        let info = self.plan.info(&conflict.type_name)?;
        let mut updates = Vec::new();
        for field in &conflict.fields {
            let Some(theirs) = &field.theirs else {
                continue;
            };
            let many_to_many = info
                .embedded_field(&field.name)
                .map(|e| e.is_many_to_many)
                .unwrap_or(false);
            let value = if many_to_many {
                self.rebuild_links(&theirs.value, &field.references)?
            } else {
                theirs.value.clone()
            };
            updates.push((field.name.clone(), value));
        }
        if let Some(version) = &conflict.their_version {
            updates.push((self.plan.version_field().to_string(), version.clone()));
        }

        if let Some(Some(base)) = self.bases.get_mut(&key) {
            for (name, value) in updates {
                base.set(name, value);
            }
        }
        Ok(())
    }

    /// Turn a resolved association list into link rows carrying the server's
    /// identity and version, and register those rows as known base versions.
    fn rebuild_links(
        &mut self,
        list: &Value,
        references: &[EntityReference],
    ) -> Result<Value, MergeError> {
        let Value::Array(items) = list else {
            return Ok(list.clone());
        };
        let id_field = self.plan.id_field().to_string();
        let version_field = self.plan.version_field().to_string();
        let positional = references.len() == items.len();

        let mut rows = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let Ok(mut row) = DomainObject::try_from(item.clone()) else {
                rows.push(item.clone());
                continue;
            };
            let reference = references
                .iter()
                .find(|r| row.get(&id_field) == Some(&r.id) && row.type_name() == Some(r.type_name.as_str()))
                .or_else(|| positional.then(|| &references[index]));
            if let Some(reference) = reference {
                row.set(id_field.clone(), reference.id.clone());
                if let Some(version) = &reference.version {
                    row.set(version_field.clone(), version.clone());
                }
                let row_key = self.key(&row)?;
                self.bases.insert(row_key.clone(), Some(row.clone()));
                self.entries
                    .insert(row_key, WorkingSetEntry::registered(row.clone()));
            }
            rows.push(row.into_value());
        }
        Ok(Value::Array(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::protocol::{ConflictField, FieldResolution};
    use crate::merge::schema::{FieldDef, Schema};
    use crate::merge::{EntryStatus, MergePlan};
    use serde_json::json;

    fn working_set() -> WorkingSet {
        let schema = Schema::default().with_type(
            "Qux",
            vec![
                FieldDef::scalar("id", "String"),
                FieldDef::scalar("version", "String"),
                FieldDef::scalar("description", "String"),
                FieldDef::scalar("title", "String"),
            ],
        );
        WorkingSet::new(Arc::new(MergePlan::new(schema)))
    }

    fn qux() -> DomainObject {
        DomainObject::new("Qux")
            .with("id", json!("Q"))
            .with("version", json!("v1"))
            .with("description", json!("base"))
            .with("title", json!("t"))
    }

    fn conflict() -> Conflict {
        Conflict {
            type_name: "Qux".to_string(),
            id: TypedValue::new("String", json!("Q")),
            their_version: Some(json!("v2")),
            deleted: false,
            decided: false,
            fields: vec![ConflictField {
                name: "description".to_string(),
                status: FieldStatus::Undecided,
                ours: None,
                theirs: Some(TypedValue::new("String", json!("theirs"))),
                references: vec![],
                informational: false,
            }],
        }
    }

    fn resolution(status: FieldStatus, value: Option<Value>) -> Resolution {
        Resolution {
            type_name: "Qux".to_string(),
            id: TypedValue::new("String", json!("Q")),
            fields: vec![FieldResolution {
                name: "description".to_string(),
                status,
                value: value.map(|v| TypedValue::new("String", v)),
            }],
        }
    }

    fn edited() -> WorkingSet {
        let mut ws = working_set();
        ws.register_base_version(&qux(), false, true).unwrap();
        ws.add_changes(&qux().with("description", json!("ours")), false, false)
            .unwrap();
        ws
    }

    #[test]
    fn prepare_backfills_ours_from_live_object() {
        let ws = edited();
        let prepared = ws.prepare_conflicts(vec![conflict()]);
        let field = prepared[0].field("description").unwrap();
        assert_eq!(field.ours, Some(TypedValue::new("String", json!("ours"))));
    }

    #[test]
    fn theirs_updates_base_only() {
        let mut ws = edited();
        let conflicts = ws.prepare_conflicts(vec![conflict()]);
        ws.apply(&[resolution(FieldStatus::Theirs, None)], &conflicts)
            .unwrap();

        let id = json!("Q");
        assert_eq!(ws.lookup("Qux", &id).unwrap().get("description"), Some(&json!("ours")));
        let base = ws.lookup_base("Qux", &id).unwrap();
        assert_eq!(base.get("description"), Some(&json!("theirs")));
        assert_eq!(base.get("version"), Some(&json!("v2")));
        assert_eq!(ws.status("Qux", &id), Some(EntryStatus::Modified));
    }

    #[test]
    fn value_overrides_live_object() {
        let mut ws = edited();
        let conflicts = ws.prepare_conflicts(vec![conflict()]);
        ws.apply(&[resolution(FieldStatus::Value, Some(json!("merged")))], &conflicts)
            .unwrap();

        let id = json!("Q");
        assert_eq!(ws.lookup("Qux", &id).unwrap().get("description"), Some(&json!("merged")));
        let change = ws.diff().unwrap();
        let change = change.change("Qux", &id).unwrap();
        assert_eq!(change.version, Some(json!("v2")));
        assert_eq!(change.field("description").unwrap().value.value, json!("merged"));
    }
}
