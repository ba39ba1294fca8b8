//! Optimistic merge engine for graphs of domain objects.
//!
//! # Key Concepts
//!
//! - **Schema**: the domain types, their relations and the merge groups
//! - **MergePlan**: per-type field classification derived once from the schema
//!   (scalar, grouped, embedded to-one, embedded many-to-many)
//! - **WorkingSet**: base and current versions of every tracked object, the diff
//!   between them and the merge round trip with conflict resolution
//!
//! Many-to-many associations are represented by link rows. Link rows are only
//! ever created or deleted; the owning collection is reported as changed whenever
//! one of its link rows is.

mod diff;
mod domain;
mod error;
mod plan;
mod protocol;
mod resolve;
mod schema;
mod working_set;

pub use diff::{EntityChange, EntityDeletion, FieldValueChange, MergeDiff, DOMAIN_OBJECT_LIST_TYPE};
pub use domain::{entity_key, DomainObject, TypedValue, TYPE_FIELD};
pub use error::MergeError;
pub use plan::{EmbeddedField, FieldInfo, LinkReference, MergePlan, MergeTypeInfo};
pub use protocol::{
    CancelResolver, Conflict, ConflictDecision, ConflictField, ConflictResolver, EntityReference,
    FieldResolution, FieldStatus, MergeEndpoint, MergeOperation, MergeRequest, MergeResponse,
    Resolution,
};
pub use schema::{FieldDef, MergeConfig, MergeGroup, RelationDef, Schema, TypeDef};
pub use working_set::{BeforeMergeHook, DiscardHook, EntryStatus, WorkingSet, WorkingSetEntry};
