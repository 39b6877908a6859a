//! Schema Registry
//!
//! Versioned JSON-Schema documents. Every document is meta-validated before
//! it is stored; `(name, entityType)` identifies a group and never changes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::TextDiff;
use tracing::{info, warn};

use super::RegistryOptions;
use crate::error::{RegistryError, Result};
use crate::events::{emit, EventKind, EventPublisher, RegistryEvent};
use crate::guard::ReferentialGuard;
use crate::model::{fields, EntityKind, EntityType, GroupId, SchemaVersion, VersionId};
use crate::store::{Filter, Patch, Sort};
use crate::validator::{MetaValidator, ValidationReport, ValidatorCache};
use crate::version_store::VersionStore;

/// Requested changes for a new schema version
///
/// `name` and `entity_type` may only repeat the current values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRevision {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl SchemaRevision {
    pub fn document(document: Value) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }
}

pub struct SchemaRegistry {
    versions: Arc<VersionStore<SchemaVersion>>,
    cache: Arc<dyn ValidatorCache>,
    meta: MetaValidator,
    guard: Arc<ReferentialGuard>,
    publisher: Arc<dyn EventPublisher>,
    options: RegistryOptions,
}

impl SchemaRegistry {
    pub fn new(
        versions: Arc<VersionStore<SchemaVersion>>,
        cache: Arc<dyn ValidatorCache>,
        guard: Arc<ReferentialGuard>,
        publisher: Arc<dyn EventPublisher>,
        options: RegistryOptions,
    ) -> Result<Self> {
        Ok(Self {
            versions,
            cache,
            meta: MetaValidator::new(options.max_errors)?,
            guard,
            publisher,
            options,
        })
    }

    /// Register a new schema group at version 1
    pub fn register(
        &self,
        name: &str,
        entity_type: EntityType,
        document: Value,
        description: Option<String>,
    ) -> Result<SchemaVersion> {
        self.meta.check(&document)?;

        let created = self
            .versions
            .create_group(SchemaVersion::draft(name, entity_type, document, description))?;
        self.warm(&created);

        info!(name, %entity_type, group_id = %created.group_id(), "Registered schema");
        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityCreated, &created),
        );
        Ok(created)
    }

    /// Append a new active version built from the current one plus `revision`
    pub fn revise(&self, group_id: &GroupId, revision: SchemaRevision) -> Result<SchemaVersion> {
        let created = self.versions.create_next_version(group_id, |base| {
            if let Some(name) = &revision.name {
                if *name != base.name {
                    return Err(RegistryError::ImmutableField { field: fields::NAME });
                }
            }
            if let Some(entity_type) = revision.entity_type {
                if entity_type != base.entity_type {
                    return Err(RegistryError::ImmutableField {
                        field: fields::ENTITY_TYPE,
                    });
                }
            }

            let document = match &revision.document {
                Some(document) => {
                    self.meta.check(document)?;
                    document.clone()
                }
                None => base.document.clone(),
            };
            let description = revision
                .description
                .clone()
                .or_else(|| base.description.clone());

            let mut next = SchemaVersion::draft(&base.name, base.entity_type, document, description);
            next.enabled = revision.enabled.unwrap_or(base.enabled);
            Ok(next)
        })?;
        self.warm(&created);

        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityUpdated, &created),
        );
        Ok(created)
    }

    /// Make an existing version the group's active one
    pub fn activate(&self, group_id: &GroupId, version_number: u32) -> Result<SchemaVersion> {
        let activated = self.versions.set_active(group_id, version_number)?;
        self.warm(&activated);

        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityUpdated, &activated),
        );
        Ok(activated)
    }

    /// Delete the whole group, unless any configuration pins one of its versions
    pub fn retire(&self, group_id: &GroupId) -> Result<usize> {
        let _exclusive = self.guard.exclusive();
        let removed = self.versions.delete_group_with(group_id, |versions| {
            self.guard.ensure_unreferenced(group_id, versions)
        })?;

        for version in &removed {
            self.cache.invalidate(version.unique_id());
        }
        if !removed.is_empty() {
            info!(group_id = %group_id, count = removed.len(), "Retired schema group");
            emit(
                self.publisher.as_ref(),
                RegistryEvent::deleted(EntityKind::Schema, group_id.clone(), removed.len()),
            );
        }
        Ok(removed.len())
    }

    /// Validate data against one exact schema version
    pub fn validate(&self, schema_unique_id: &VersionId, data: &Value) -> Result<ValidationReport> {
        let schema = self.require(schema_unique_id)?;
        self.validate_against(&schema, data)
    }

    /// Validate data against an already fetched schema version
    pub fn validate_against(&self, schema: &SchemaVersion, data: &Value) -> Result<ValidationReport> {
        let compiled = self
            .cache
            .get_or_compile(schema.unique_id(), &schema.document)?;
        Ok(compiled.validate(data, self.options.max_errors))
    }

    /// Toggle `enabled` on every version of the group
    pub fn set_enabled(&self, group_id: &GroupId, enabled: bool) -> Result<SchemaVersion> {
        self.versions
            .patch_group(group_id, Patch::new().set(fields::ENABLED, enabled))?;
        let current = self.current(group_id)?;

        info!(group_id = %group_id, enabled, "Changed schema availability");
        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityUpdated, &current),
        );
        Ok(current)
    }

    pub fn get_active(&self, group_id: &GroupId) -> Result<Option<SchemaVersion>> {
        self.versions.get_active(group_id)
    }

    pub fn get_version(&self, group_id: &GroupId, version_number: u32) -> Result<Option<SchemaVersion>> {
        self.versions.get_by_version(group_id, version_number)
    }

    pub fn get_by_id(&self, unique_id: &VersionId) -> Result<Option<SchemaVersion>> {
        self.versions.get_by_id(unique_id)
    }

    /// Like `get_by_id`, failing with `SchemaVersionNotFound`
    pub fn require(&self, unique_id: &VersionId) -> Result<SchemaVersion> {
        self.versions
            .get_by_id(unique_id)?
            .ok_or_else(|| RegistryError::SchemaVersionNotFound {
                unique_id: unique_id.clone(),
            })
    }

    pub fn list_versions(&self, group_id: &GroupId) -> Result<Vec<SchemaVersion>> {
        self.versions.list_versions(group_id)
    }

    /// The active version of the group registered as `(name, entity_type)`
    ///
    /// Falls back to the highest version while the group has no active one.
    pub fn find_by_name(&self, name: &str, entity_type: EntityType) -> Result<Option<SchemaVersion>> {
        let filter = Filter::new()
            .eq_ignore_case(fields::NAME, name)
            .eq(fields::ENTITY_TYPE, entity_type.as_str());
        let mut versions = self.versions.find(
            &filter,
            Some(&Sort::descending(fields::VERSION_NUMBER)),
            None,
        )?;

        match versions.iter().position(|v| v.is_active()) {
            Some(index) => Ok(Some(versions.swap_remove(index))),
            None => Ok(versions.into_iter().next()),
        }
    }

    /// Active, enabled schemas, ordered by name
    pub fn list_selectable(&self, entity_type: Option<EntityType>) -> Result<Vec<SchemaVersion>> {
        let mut filter = Filter::new()
            .eq(fields::IS_ACTIVE, true)
            .eq(fields::ENABLED, true);
        if let Some(entity_type) = entity_type {
            filter = filter.eq(fields::ENTITY_TYPE, entity_type.as_str());
        }
        self.versions
            .find(&filter, Some(&Sort::ascending(fields::NAME)), None)
    }

    /// Active version of every group, enabled or not, ordered by name
    pub fn list_active(&self, entity_type: Option<EntityType>) -> Result<Vec<SchemaVersion>> {
        let mut filter = Filter::new().eq(fields::IS_ACTIVE, true);
        if let Some(entity_type) = entity_type {
            filter = filter.eq(fields::ENTITY_TYPE, entity_type.as_str());
        }
        self.versions
            .find(&filter, Some(&Sort::ascending(fields::NAME)), None)
    }

    /// Unified diff between two versions' documents
    pub fn diff_versions(&self, group_id: &GroupId, from: u32, to: u32) -> Result<String> {
        let old = self.version_or_err(group_id, from)?;
        let new = self.version_or_err(group_id, to)?;

        let old_text = serde_json::to_string_pretty(&old.document)?;
        let new_text = serde_json::to_string_pretty(&new.document)?;
        let diff = TextDiff::from_lines(&old_text, &new_text);
        let rendered = diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("v{}", from), &format!("v{}", to))
            .to_string();
        Ok(rendered)
    }

    /// Configurations pinned to any version of the group
    pub fn reference_count(&self, group_id: &GroupId) -> Result<usize> {
        self.guard.count_configurations_referencing(group_id)
    }

    pub fn cache(&self) -> &Arc<dyn ValidatorCache> {
        &self.cache
    }

    fn version_or_err(&self, group_id: &GroupId, version_number: u32) -> Result<SchemaVersion> {
        self.versions
            .get_by_version(group_id, version_number)?
            .ok_or_else(|| RegistryError::VersionNotFound {
                kind: EntityKind::Schema,
                group_id: group_id.clone(),
                version: version_number,
            })
    }

    fn current(&self, group_id: &GroupId) -> Result<SchemaVersion> {
        if let Some(active) = self.versions.get_active(group_id)? {
            return Ok(active);
        }
        self.versions
            .list_versions(group_id)?
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::GroupNotFound {
                kind: EntityKind::Schema,
                group_id: group_id.clone(),
            })
    }

    /// Best-effort compile into the cache; failures only warn
    fn warm(&self, schema: &SchemaVersion) {
        if !self.options.warm_cache {
            return;
        }
        if let Err(e) = self.cache.get_or_compile(schema.unique_id(), &schema.document) {
            warn!(
                unique_id = %schema.unique_id(),
                name = %schema.name,
                error = %e,
                "Schema registered but its validator failed to compile"
            );
        }
    }
}
