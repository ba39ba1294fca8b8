//! Per-type field classification for diffing.
//!
//! A [`MergePlan`] splits every field of a domain type into one of:
//!
//! - **scalar fields**: plain values that are diffed one by one
//! - **group fields**: configured merge groups, always reported as a whole
//! - **embedded fields**: relations holding other domain objects. A list of
//!   link-type objects with a many-to-many relation on both sides is a
//!   many-to-many embed; other lists are plain to-many embeds and are not diffed
//!
//! The version field is never diffed. Classification is derived once from the
//! schema when the plan is created.

use super::error::MergeError;
use super::schema::{RelationDef, Schema, TypeDef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddedField {
    pub name: String,
    /// Element type for lists, target type for to-one fields.
    pub type_name: String,
    pub is_list: bool,
    pub is_many_to_many: bool,
    pub link_type: Option<String>,
    /// Link relation pointing back at the owning type.
    pub left_side_relation: Option<RelationDef>,
    /// Link relation pointing at the other side.
    pub right_side_relation: Option<RelationDef>,
}

impl EmbeddedField {
    pub fn is_to_one(&self) -> bool {
        !self.is_list
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTypeInfo {
    pub type_name: String,
    pub id_type: String,
    pub scalar_fields: Vec<FieldInfo>,
    pub group_fields: Vec<Vec<FieldInfo>>,
    pub embedded: Vec<EmbeddedField>,
}

impl MergeTypeInfo {
    pub fn embedded_field(&self, name: &str) -> Option<&EmbeddedField> {
        self.embedded.iter().find(|e| e.name == name)
    }

    /// Declared type of a scalar or grouped field.
    pub fn field_type(&self, name: &str) -> Option<&str> {
        self.scalar_fields
            .iter()
            .chain(self.group_fields.iter().flatten())
            .find(|f| f.name == name)
            .map(|f| f.type_name.as_str())
    }
}

/// A many-to-many collection that holds rows of a link type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkReference {
    pub owner_type: String,
    pub field: String,
    pub relation: RelationDef,
}

#[derive(Debug)]
pub struct MergePlan {
    schema: Schema,
    infos: HashMap<String, Arc<MergeTypeInfo>>,
    link_references: HashMap<String, Vec<LinkReference>>,
}

impl MergePlan {
    pub fn new(schema: Schema) -> Self {
        let infos: HashMap<_, _> = schema
            .types
            .iter()
            .map(|type_def| (type_def.name.clone(), Arc::new(classify(&schema, type_def))))
            .collect();

        let mut link_references: HashMap<String, Vec<LinkReference>> = HashMap::new();
        for info in infos.values() {
            for embedded in info.embedded.iter().filter(|e| e.is_many_to_many) {
                if let (Some(link_type), Some(relation)) =
                    (&embedded.link_type, &embedded.left_side_relation)
                {
                    link_references
                        .entry(link_type.clone())
                        .or_default()
                        .push(LinkReference {
                            owner_type: info.type_name.clone(),
                            field: embedded.name.clone(),
                            relation: relation.clone(),
                        });
                }
            }
        }
        for references in link_references.values_mut() {
            references.sort_by(|a, b| a.owner_type.cmp(&b.owner_type).then(a.field.cmp(&b.field)));
        }

        Self {
            schema,
            infos,
            link_references,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn id_field(&self) -> &str {
        &self.schema.id_field
    }

    pub fn version_field(&self) -> &str {
        &self.schema.version_field
    }

    pub fn info(&self, type_name: &str) -> Result<Arc<MergeTypeInfo>, MergeError> {
        self.infos
            .get(type_name)
            .cloned()
            .ok_or_else(|| MergeError::UnknownType(type_name.to_string()))
    }

    /// Collections referencing rows of `link_type`.
    pub fn link_references(&self, link_type: &str) -> &[LinkReference] {
        self.link_references
            .get(link_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_link_type(&self, type_name: &str) -> bool {
        self.link_references.contains_key(type_name)
    }
}

fn classify(schema: &Schema, type_def: &TypeDef) -> MergeTypeInfo {
    let field_info = |name: &str| FieldInfo {
        name: name.to_string(),
        type_name: type_def
            .field(name)
            .map(|f| f.type_name.clone())
            .unwrap_or_else(|| "String".to_string()),
    };

    let group_fields: Vec<Vec<FieldInfo>> = schema
        .merge
        .groups_for(&type_def.name)
        .map(|group| group.fields.iter().map(|f| field_info(f.as_str())).collect())
        .collect();
    let grouped: HashSet<&str> = group_fields
        .iter()
        .flatten()
        .map(|f| f.name.as_str())
        .collect();

    let mut scalar_fields = Vec::new();
    let mut embedded = Vec::new();
    for field in &type_def.fields {
        if field.name == schema.version_field {
            continue;
        }
        if schema.is_object_type(&field.type_name) {
            embedded.push(classify_embedded(schema, &type_def.name, field.name.as_str(), &field.type_name, field.list));
        } else if !grouped.contains(field.name.as_str()) {
            scalar_fields.push(field_info(field.name.as_str()));
        }
    }

    MergeTypeInfo {
        type_name: type_def.name.clone(),
        id_type: type_def
            .field(&schema.id_field)
            .map(|f| f.type_name.clone())
            .unwrap_or_else(|| "String".to_string()),
        scalar_fields,
        group_fields,
        embedded,
    }
}

fn classify_embedded(
    schema: &Schema,
    owner: &str,
    name: &str,
    element_type: &str,
    is_list: bool,
) -> EmbeddedField {
    let (left, right) = if is_list {
        let left = schema
            .relations_from(element_type)
            .find(|r| {
                r.many_to_many
                    && r.target_type == owner
                    && r.right_side_object.as_deref().map_or(true, |f| f == name)
            })
            .cloned();
        let right = schema
            .relations_from(element_type)
            .find(|r| r.many_to_many && r.target_type != owner)
            .cloned();
        (left, right)
    } else {
        (None, None)
    };
    let is_many_to_many = left.is_some() && right.is_some();

    EmbeddedField {
        name: name.to_string(),
        type_name: element_type.to_string(),
        is_list,
        is_many_to_many,
        link_type: is_many_to_many.then(|| element_type.to_string()),
        left_side_relation: left.filter(|_| is_many_to_many),
        right_side_relation: right.filter(|_| is_many_to_many),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::schema::FieldDef;

    fn schema() -> Schema {
        Schema::default()
            .with_type(
                "Corge",
                vec![
                    FieldDef::scalar("id", "String"),
                    FieldDef::scalar("version", "String"),
                    FieldDef::scalar("name", "String"),
                    FieldDef::scalar("num", "Int"),
                    FieldDef::scalar("num2", "Int"),
                    FieldDef::list("corgeLinks", "CorgeLink"),
                    FieldDef::list("notes", "Note"),
                    FieldDef::scalar("owner", "Foo"),
                ],
            )
            .with_type("Foo", vec![FieldDef::scalar("id", "String")])
            .with_type("Note", vec![FieldDef::scalar("id", "String")])
            .with_type("Baz", vec![FieldDef::scalar("id", "String")])
            .with_type(
                "CorgeLink",
                vec![
                    FieldDef::scalar("id", "String"),
                    FieldDef::scalar("corgeId", "String"),
                    FieldDef::scalar("bazId", "String"),
                ],
            )
            .with_relation(RelationDef {
                name: "link_corge".to_string(),
                source_type: "CorgeLink".to_string(),
                source_field: "corgeId".to_string(),
                target_type: "Corge".to_string(),
                target_field: "id".to_string(),
                left_side_object: Some("corge".to_string()),
                right_side_object: Some("corgeLinks".to_string()),
                many_to_many: true,
            })
            .with_relation(RelationDef {
                name: "link_baz".to_string(),
                source_type: "CorgeLink".to_string(),
                source_field: "bazId".to_string(),
                target_type: "Baz".to_string(),
                target_field: "id".to_string(),
                left_side_object: Some("baz".to_string()),
                right_side_object: None,
                many_to_many: true,
            })
            .with_group("Corge", "nums", ["num", "num2"])
    }

    #[test]
    fn fields_are_partitioned() {
        let plan = MergePlan::new(schema());
        let info = plan.info("Corge").unwrap();

        let scalars: Vec<_> = info.scalar_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(scalars, vec!["id", "name"]);
        assert_eq!(info.group_fields.len(), 1);
        assert_eq!(info.group_fields[0][1].type_name, "Int");
        assert_eq!(info.embedded.len(), 3);
        assert_eq!(info.id_type, "String");
    }

    #[test]
    fn many_to_many_needs_both_sides() {
        let plan = MergePlan::new(schema());
        let info = plan.info("Corge").unwrap();

        let links = info.embedded_field("corgeLinks").unwrap();
        assert!(links.is_many_to_many);
        assert_eq!(links.link_type.as_deref(), Some("CorgeLink"));
        assert_eq!(links.right_side_relation.as_ref().map(|r| r.target_type.as_str()), Some("Baz"));

        let notes = info.embedded_field("notes").unwrap();
        assert!(notes.is_list);
        assert!(!notes.is_many_to_many);

        assert!(info.embedded_field("owner").unwrap().is_to_one());
    }

    #[test]
    fn link_references_point_at_owning_collections() {
        let plan = MergePlan::new(schema());

        let references = plan.link_references("CorgeLink");
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].owner_type, "Corge");
        assert_eq!(references[0].field, "corgeLinks");
        assert_eq!(references[0].relation.source_field, "corgeId");
        assert!(plan.is_link_type("CorgeLink"));
        assert!(!plan.is_link_type("Corge"));
    }

    #[test]
    fn unknown_types_fail() {
        let plan = MergePlan::new(schema());
        assert_eq!(
            plan.info("Nope").unwrap_err(),
            MergeError::UnknownType("Nope".to_string())
        );
    }
}
