//! Storage collaborator
//!
//! The registry core only needs a document store reachable by opaque unique
//! keys and simple conjunctive filters over top-level fields. Documents are
//! plain JSON objects whose field names are listed in [`crate::model::fields`].

pub mod file;
pub mod memory;

use std::cmp::Ordering;
use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{fields, EntityKind, VersionId};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Corrupt collection file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Store lock poisoned: {0}")]
    Poisoned(&'static str),
}

/// A single field condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    /// String comparison ignoring case; non-string fields never match
    EqIgnoreCase(String),
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Condition::Eq(expected), Some(actual)) => expected == actual,
            (Condition::EqIgnoreCase(expected), Some(Value::String(actual))) => {
                actual.to_lowercase() == *expected
            }
            (Condition::In(options), Some(actual)) => options.contains(actual),
            _ => false,
        }
    }
}

/// Conjunction of field conditions; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((field.to_string(), Condition::Eq(value.into())));
        self
    }

    pub fn eq_ignore_case(mut self, field: &str, value: &str) -> Self {
        self.clauses
            .push((field.to_string(), Condition::EqIgnoreCase(value.to_lowercase())));
        self
    }

    pub fn any_of<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field.to_string(), Condition::In(values)));
        self
    }

    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(document.get(field)))
    }
}

/// Sort order for `find_many`
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn ascending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn descending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(a.get(&self.field), b.get(&self.field));
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            match (a.as_u64(), b.as_u64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Field assignments applied by `update_many`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    set: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Apply to a document; returns false for non-object documents
    pub fn apply(&self, document: &mut Value) -> bool {
        match document.as_object_mut() {
            Some(object) => {
                for (field, value) in &self.set {
                    object.insert(field.clone(), value.clone());
                }
                true
            }
            None => false,
        }
    }
}

/// The document store the registry persists through
///
/// One instance is constructed per process and shared by every registry.
/// Implementations must make each individual call atomic with respect to
/// other calls; multi-call sequences are serialized by the version store.
pub trait DocumentStore: Send + Sync {
    /// Insert a document, assigning its `uniqueId` when absent or nil
    fn insert(&self, kind: EntityKind, document: Value) -> Result<VersionId, StoreError>;

    fn find_one(&self, kind: EntityKind, filter: &Filter) -> Result<Option<Value>, StoreError>;

    fn find_many(
        &self,
        kind: EntityKind,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Returns the number of documents modified
    fn update_many(&self, kind: EntityKind, filter: &Filter, patch: &Patch)
        -> Result<usize, StoreError>;

    /// Returns the number of documents removed
    fn delete_many(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError>;

    fn count(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.find_many(kind, filter, None, None)?.len())
    }
}

/// Ensure the document carries a non-nil `uniqueId` and return it
pub(crate) fn assign_unique_id(document: &mut Value) -> Result<VersionId, StoreError> {
    let object = document
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidDocument("document must be a JSON object".into()))?;

    let existing = object
        .get(fields::UNIQUE_ID)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<VersionId>().ok());

    let id = existing.unwrap_or_else(VersionId::new);
    object.insert(fields::UNIQUE_ID.to_string(), Value::String(id.as_str().to_string()));
    Ok(id)
}
