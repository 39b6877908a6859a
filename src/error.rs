//! Error types for the configuration registry

use thiserror::Error;

use crate::model::{EntityKind, EntityType, GroupId, VersionId};
use crate::store::StoreError;
use crate::validator::ValidationIssue;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry errors
///
/// Every variant is locally recoverable. Registries propagate these unchanged
/// so request handlers can map them onto responses.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{kind} named '{name}' already exists in scope {scope}")]
    DuplicateName {
        kind: EntityKind,
        name: String,
        scope: String,
    },

    #[error("{kind} group not found: {group_id}")]
    GroupNotFound { kind: EntityKind, group_id: GroupId },

    #[error("{kind} group {group_id} has no version {version}")]
    VersionNotFound {
        kind: EntityKind,
        group_id: GroupId,
        version: u32,
    },

    #[error("{kind} version not found: {unique_id}")]
    EntityNotFound { kind: EntityKind, unique_id: VersionId },

    #[error("Field '{field}' cannot be changed after creation")]
    ImmutableField { field: &'static str },

    #[error("Entity type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: EntityType,
        actual: EntityType,
    },

    #[error("Invalid schema document ({} errors)", .errors.len())]
    InvalidSchemaDocument { errors: Vec<ValidationIssue> },

    #[error("Schema version {unique_id} failed to compile: {message}")]
    SchemaCompilation { unique_id: VersionId, message: String },

    #[error("Validation failed ({} errors)", .errors.len())]
    Validation { errors: Vec<ValidationIssue> },

    #[error("Schema group {group_id} is referenced by {count} configuration version(s)")]
    ReferencedEntity { group_id: GroupId, count: usize },

    #[error("Schema version not found: {unique_id}")]
    SchemaVersionNotFound { unique_id: VersionId },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegistryError {
    /// Structured per-field messages carried by validation style errors
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            RegistryError::InvalidSchemaDocument { errors }
            | RegistryError::Validation { errors } => errors,
            _ => &[],
        }
    }

    /// Whether this error means the requested entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::GroupNotFound { .. }
                | RegistryError::VersionNotFound { .. }
                | RegistryError::EntityNotFound { .. }
                | RegistryError::SchemaVersionNotFound { .. }
        )
    }
}
