//! Merge endpoint protocol and conflict resolution contract.

use super::diff::{EntityChange, EntityDeletion};
use super::domain::TypedValue;
use super::error::MergeError;
use super::schema::MergeConfig;
use crate::transport::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Body submitted to the merge endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub changes: Vec<EntityChange>,
    pub deletions: Vec<EntityDeletion>,
    pub merge_config: MergeConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    pub done: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldStatus {
    Undecided,
    Ours,
    Theirs,
    Value,
}

/// Server-side identity and version of an associated object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: Value,
    #[serde(default)]
    pub version: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictField {
    pub name: String,
    pub status: FieldStatus,
    #[serde(default)]
    pub ours: Option<TypedValue>,
    #[serde(default)]
    pub theirs: Option<TypedValue>,
    #[serde(default)]
    pub references: Vec<EntityReference>,
    #[serde(default)]
    pub informational: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: TypedValue,
    #[serde(default)]
    pub their_version: Option<Value>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub decided: bool,
    pub fields: Vec<ConflictField>,
}

impl Conflict {
    pub fn field(&self, name: &str) -> Option<&ConflictField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// What to do after a conflicted merge attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeOperation {
    /// Leave everything as it is.
    Cancel,
    /// Revert local changes to the base versions.
    Discard,
    /// Apply the resolutions locally without re-submitting.
    Apply,
    /// Apply the resolutions and submit again. Also the result of a finished merge.
    Store,
}

impl FromStr for MergeOperation {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CANCEL" => Ok(MergeOperation::Cancel),
            "DISCARD" => Ok(MergeOperation::Discard),
            "APPLY" => Ok(MergeOperation::Apply),
            "STORE" => Ok(MergeOperation::Store),
            other => Err(MergeError::InvalidOperation(other.to_string())),
        }
    }
}

impl fmt::Display for MergeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeOperation::Cancel => "CANCEL",
            MergeOperation::Discard => "DISCARD",
            MergeOperation::Apply => "APPLY",
            MergeOperation::Store => "STORE",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldResolution {
    pub name: String,
    pub status: FieldStatus,
    /// Resolved value for `VALUE`; ignored otherwise.
    #[serde(default)]
    pub value: Option<TypedValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: TypedValue,
    pub fields: Vec<FieldResolution>,
}

/// Result of a conflict-resolution round. `operation` is parsed into a
/// [`MergeOperation`]; anything else fails the merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictDecision {
    pub operation: String,
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
}

impl ConflictDecision {
    pub fn new(operation: MergeOperation, resolutions: Vec<Resolution>) -> Self {
        Self {
            operation: operation.to_string(),
            resolutions,
        }
    }
}

/// Server side of the merge round trip.
#[async_trait]
pub trait MergeEndpoint: Send + Sync {
    async fn merge(&self, request: &MergeRequest) -> Result<MergeResponse, TransportError>;
}

/// Presents conflicts to the user and returns their decision.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, conflicts: &[Conflict]) -> Result<ConflictDecision, MergeError>;
}

/// Resolver that cancels every conflicted merge.
#[derive(Clone, Copy, Debug, Default)]
pub struct CancelResolver;

#[async_trait]
impl ConflictResolver for CancelResolver {
    async fn resolve(&self, _conflicts: &[Conflict]) -> Result<ConflictDecision, MergeError> {
        Ok(ConflictDecision::new(MergeOperation::Cancel, Vec::new()))
    }
}
