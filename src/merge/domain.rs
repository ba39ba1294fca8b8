//! Domain objects as tracked by a working set.

use super::error::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field holding the domain type name of an object.
pub const TYPE_FIELD: &str = "_type";

/// A value tagged with its schema type, as exchanged with the merge endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
}

impl TypedValue {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }
}

/// `"<type>:<id>"` key identifying an entity within a working set.
pub fn entity_key(type_name: &str, id: &Value) -> String {
    match id {
        Value::String(id) => format!("{type_name}:{id}"),
        other => format!("{type_name}:{other}"),
    }
}

/// An owned JSON object carrying its domain type in `_type`.
///
/// Relation fields hold embedded objects (to-one) or arrays of embedded objects.
///
/// ```
/// use flowstate::merge::DomainObject;
/// use serde_json::json;
///
/// let corge = DomainObject::new("Corge").with("id", json!("X")).with("num", json!(1));
/// assert_eq!(corge.type_name(), Some("Corge"));
/// assert_eq!(corge.key("id").unwrap(), "Corge:X");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainObject(Map<String, Value>);

impl DomainObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(type_name.into()));
        Self(fields)
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Working-set key of this object.
    pub fn key(&self, id_field: &str) -> Result<String, MergeError> {
        let type_name = self
            .type_name()
            .ok_or_else(|| MergeError::MissingIdentity(format!("missing '{TYPE_FIELD}'")))?;
        let id = self
            .0
            .get(id_field)
            .filter(|id| !id.is_null())
            .ok_or_else(|| MergeError::MissingIdentity(format!("{type_name} without '{id_field}'")))?;
        Ok(entity_key(type_name, id))
    }

    /// Embedded object at `field`, if it is one.
    pub fn object(&self, field: &str) -> Option<DomainObject> {
        match self.0.get(field) {
            Some(Value::Object(map)) => Some(DomainObject(map.clone())),
            _ => None,
        }
    }

    /// Embedded objects of a list field. Non-object elements are skipped.
    pub fn objects(&self, field: &str) -> Vec<DomainObject> {
        match self.0.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned().map(DomainObject))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl TryFrom<Value> for DomainObject {
    type Error = MergeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) if map.get(TYPE_FIELD).map(Value::is_string).unwrap_or(false) => {
                Ok(Self(map))
            }
            Value::Object(_) => Err(MergeError::MissingIdentity(format!(
                "object without '{TYPE_FIELD}'"
            ))),
            other => Err(MergeError::MissingIdentity(format!("not an object: {other}"))),
        }
    }
}

impl From<DomainObject> for Value {
    fn from(object: DomainObject) -> Self {
        object.into_value()
    }
}

impl fmt::Display for DomainObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
