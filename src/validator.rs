//! JSON-Schema compilation, meta-validation and the validator cache
//!
//! Schema documents are compiled once per schema version. Compiled
//! validators are keyed by the version's immutable `uniqueId`, so a cached
//! entry can only go stale by deletion of that version.

use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::model::VersionId;

/// Path reported for violations at the document root
pub const ROOT_PATH: &str = "(root)";

/// Default cap on reported violations per validation call
pub const DEFAULT_MAX_ERRORS: usize = 64;

const DRAFT7_META_SCHEMA: &str = include_str!("../meta/draft-07.schema.json");

/// A single violation: where it happened and what is wrong
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path: if path.is_empty() { ROOT_PATH.to_string() } else { path },
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Outcome of validating data against a schema version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn success() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn failure(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Convert a failed report into a `Validation` error
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(RegistryError::Validation {
                errors: self.errors,
            })
        }
    }
}

/// A compiled JSON-Schema document
pub struct CompiledSchema {
    inner: JSONSchema,
}

impl CompiledSchema {
    /// Compile a document; the error is the compiler's message
    pub fn compile(document: &Value) -> std::result::Result<Self, String> {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(document)
            .map(|inner| Self { inner })
            .map_err(|e| e.to_string())
    }

    pub fn is_valid(&self, data: &Value) -> bool {
        self.inner.is_valid(data)
    }

    /// Validate, reporting at most `max_errors` violations
    pub fn validate(&self, data: &Value, max_errors: usize) -> ValidationReport {
        match self.inner.validate(data) {
            Ok(()) => ValidationReport::success(),
            Err(errors) => ValidationReport::failure(
                errors
                    .take(max_errors.max(1))
                    .map(|e| ValidationIssue::new(e.instance_path.to_string(), e.to_string()))
                    .collect(),
            ),
        }
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

/// Checks that schema documents are themselves well-formed JSON-Schema
pub struct MetaValidator {
    meta: CompiledSchema,
    max_errors: usize,
}

impl MetaValidator {
    pub fn new(max_errors: usize) -> Result<Self> {
        let mut meta: Value = serde_json::from_str(DRAFT7_META_SCHEMA)?;
        // Resolve "#" references against the embedded copy, never the network
        if let Some(object) = meta.as_object_mut() {
            object.remove("$id");
        }
        let meta = CompiledSchema::compile(&meta).map_err(|message| {
            RegistryError::SchemaCompilation {
                unique_id: VersionId::nil(),
                message,
            }
        })?;
        Ok(Self { meta, max_errors })
    }

    /// Fails with `InvalidSchemaDocument` carrying every violation found
    pub fn check(&self, document: &Value) -> Result<()> {
        let report = self.meta.validate(document, self.max_errors);
        if report.valid {
            Ok(())
        } else {
            Err(RegistryError::InvalidSchemaDocument {
                errors: report.errors,
            })
        }
    }
}

/// Memoizes compiled validators by schema version identity
///
/// Implementations must allow concurrent use without serializing unrelated
/// keys. A racing compile of the same key may run twice; the last insert wins.
pub trait ValidatorCache: Send + Sync {
    fn get_or_compile(&self, unique_id: &VersionId, document: &Value) -> Result<Arc<CompiledSchema>>;

    /// Drop a cached entry; returns whether one was present
    fn invalidate(&self, unique_id: &VersionId) -> bool;

    fn contains(&self, unique_id: &VersionId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sharded concurrent map; lives as long as the process
#[derive(Default)]
pub struct ConcurrentValidatorCache {
    entries: DashMap<VersionId, Arc<CompiledSchema>>,
}

impl ConcurrentValidatorCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValidatorCache for ConcurrentValidatorCache {
    fn get_or_compile(&self, unique_id: &VersionId, document: &Value) -> Result<Arc<CompiledSchema>> {
        if let Some(hit) = self.entries.get(unique_id) {
            debug!(%unique_id, "Validator cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        debug!(%unique_id, "Validator cache miss, compiling");
        let compiled = CompiledSchema::compile(document).map_err(|message| {
            RegistryError::SchemaCompilation {
                unique_id: unique_id.clone(),
                message,
            }
        })?;
        let compiled = Arc::new(compiled);
        self.entries.insert(unique_id.clone(), Arc::clone(&compiled));
        Ok(compiled)
    }

    fn invalidate(&self, unique_id: &VersionId) -> bool {
        self.entries.remove(unique_id).is_some()
    }

    fn contains(&self, unique_id: &VersionId) -> bool {
        self.entries.contains_key(unique_id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_violation_uses_root_marker() {
        let compiled = CompiledSchema::compile(&json!({"type": "object", "required": ["x"]})).unwrap();
        let report = compiled.validate(&json!({}), DEFAULT_MAX_ERRORS);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, ROOT_PATH);
        assert!(report.errors[0].message.contains("x"));
    }

    #[test]
    fn test_nested_violation_path() {
        let compiled = CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {"limits": {"type": "object", "properties": {"max": {"type": "integer"}}}}
        }))
        .unwrap();
        let report = compiled.validate(&json!({"limits": {"max": "high"}}), DEFAULT_MAX_ERRORS);

        assert_eq!(report.errors[0].path, "/limits/max");
        assert!(compiled.is_valid(&json!({"limits": {"max": 3}})));
    }

    #[test]
    fn test_error_cap() {
        let compiled = CompiledSchema::compile(&json!({"type": "object", "required": ["a", "b", "c"]})).unwrap();
        assert_eq!(compiled.validate(&json!({}), 2).errors.len(), 2);
        assert!(compiled.validate(&json!({}), 0).errors.len() >= 1);
    }

    #[test]
    fn test_meta_validation() {
        let meta = MetaValidator::new(DEFAULT_MAX_ERRORS).unwrap();

        assert!(meta.check(&json!({"type": "object", "required": ["x"]})).is_ok());
        assert!(meta.check(&json!(true)).is_ok());

        let err = meta
            .check(&json!({"type": "objekt", "required": "x"}))
            .unwrap_err();
        match err {
            RegistryError::InvalidSchemaDocument { errors } => assert!(!errors.is_empty()),
            other => panic!("Expected InvalidSchemaDocument, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_memoizes_and_invalidates() {
        let cache = ConcurrentValidatorCache::new();
        let id = VersionId::new();
        let doc = json!({"type": "string"});

        let first = cache.get_or_compile(&id, &doc).unwrap();
        // a different document under the same id is ignored: the id is immutable
        let second = cache.get_or_compile(&id, &json!({"type": "integer"})).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        assert!(cache.invalidate(&id));
        assert!(!cache.invalidate(&id));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compilation_failure_not_cached() {
        let cache = ConcurrentValidatorCache::new();
        let id = VersionId::new();

        let err = cache
            .get_or_compile(&id, &json!({"type": "string", "pattern": "("}))
            .unwrap_err();
        assert!(matches!(err, RegistryError::SchemaCompilation { .. }));
        assert!(!cache.contains(&id));
    }
}
