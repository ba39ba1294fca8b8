//! Minimal schema shape needed to plan merges.
//!
//! Only types, their fields, the relations between them and the merge groups are
//! described. Everything else about the domain model is the host's business.

use super::error::MergeError;
use serde::{Deserialize, Serialize};

fn default_id_field() -> String {
    "id".to_string()
}

fn default_version_field() -> String {
    "version".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Scalar type name or the name of another domain type.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub list: bool,
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            list: false,
        }
    }

    pub fn list(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            list: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A foreign-key relation from `source_type.source_field` to
/// `target_type.target_field`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    pub name: String,
    pub source_type: String,
    pub source_field: String,
    pub target_type: String,
    #[serde(default = "default_id_field")]
    pub target_field: String,
    /// Field on the source type holding the embedded target object.
    #[serde(default)]
    pub left_side_object: Option<String>,
    /// Field on the target type holding the list of source objects.
    #[serde(default)]
    pub right_side_object: Option<String>,
    #[serde(default)]
    pub many_to_many: bool,
}

/// Fields that are always reported together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeGroup {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub fields: Vec<String>,
}

/// Merge configuration sent along with every merge request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub groups: Vec<MergeGroup>,
}

impl MergeConfig {
    pub fn groups_for<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a MergeGroup> + 'a {
        self.groups.iter().filter(move |g| g.type_name == type_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_version_field")]
    pub version_field: String,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            relations: Vec::new(),
            id_field: default_id_field(),
            version_field: default_version_field(),
            merge: MergeConfig::default(),
        }
    }
}

impl Schema {
    pub fn from_json_str(source: &str) -> Result<Self, MergeError> {
        serde_json::from_str(source).map_err(|e| MergeError::InvalidSchema(e.to_string()))
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn is_object_type(&self, name: &str) -> bool {
        self.type_def(name).is_some()
    }

    /// Relations whose foreign key lives on `source_type`.
    pub fn relations_from<'a>(&'a self, source_type: &'a str) -> impl Iterator<Item = &'a RelationDef> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.source_type == source_type)
    }

    pub fn with_type(mut self, name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        self.types.push(TypeDef {
            name: name.into(),
            fields,
        });
        self
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_group<I, S>(mut self, type_name: impl Into<String>, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.merge.groups.push(MergeGroup {
            type_name: type_name.into(),
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }
}
