//! Configuration Registry
//!
//! Versioned data objects, each version pinned to one exact schema version by
//! its `uniqueId`. Data is validated against the pinned target whenever a
//! version is written; activation never re-validates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::schema::SchemaRegistry;
use crate::error::{RegistryError, Result};
use crate::events::{emit, EventKind, EventPublisher, RegistryEvent};
use crate::guard::ReferentialGuard;
use crate::model::{
    fields, ConfigurationVersion, EntityKind, EntityType, GroupId, SchemaVersion, VersionId,
};
use crate::store::{Filter, Sort};
use crate::validator::ValidationReport;
use crate::version_store::VersionStore;

/// Requested changes for a new configuration version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRevision {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub target_schema_version_id: Option<VersionId>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ConfigurationRevision {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn retarget(target_schema_version_id: VersionId) -> Self {
        Self {
            target_schema_version_id: Some(target_schema_version_id),
            ..Self::default()
        }
    }
}

pub struct ConfigurationRegistry {
    versions: Arc<VersionStore<ConfigurationVersion>>,
    schemas: Arc<SchemaRegistry>,
    guard: Arc<ReferentialGuard>,
    publisher: Arc<dyn EventPublisher>,
}

impl ConfigurationRegistry {
    pub fn new(
        versions: Arc<VersionStore<ConfigurationVersion>>,
        schemas: Arc<SchemaRegistry>,
        guard: Arc<ReferentialGuard>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            versions,
            schemas,
            guard,
            publisher,
        }
    }

    /// Register a new configuration group pinned to `target`
    ///
    /// Nothing is written unless the data validates against the target.
    pub fn register(
        &self,
        name: &str,
        entity_type: EntityType,
        target: &VersionId,
        data: Value,
    ) -> Result<ConfigurationVersion> {
        let _pinned = self.guard.pin();

        let schema = self.resolve_target(target, entity_type)?;
        let draft = ConfigurationVersion::draft(name, entity_type, target.clone(), data);
        // cheap rejection before compiling; create_group re-checks under its lock
        self.versions.ensure_unique(&draft, None)?;
        self.schemas.validate_against(&schema, &draft.data)?.into_result()?;

        let created = self.versions.create_group(draft)?;
        info!(
            name,
            group_id = %created.group_id(),
            schema_version = %target,
            "Registered configuration"
        );
        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityCreated, &created),
        );
        Ok(created)
    }

    /// Append a new active version; data is re-validated if it or the target changed
    pub fn revise(
        &self,
        group_id: &GroupId,
        revision: ConfigurationRevision,
    ) -> Result<ConfigurationVersion> {
        let _pinned = self.guard.pin();

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

            let target = revision
                .target_schema_version_id
                .clone()
                .unwrap_or_else(|| base.target_schema_version_id.clone());
            let retargeted = target != base.target_schema_version_id;
            let data = revision.data.clone().unwrap_or_else(|| base.data.clone());

            if retargeted || revision.data.is_some() {
                let schema = self.resolve_target(&target, base.entity_type)?;
                self.schemas.validate_against(&schema, &data)?.into_result()?;
            }

            Ok(ConfigurationVersion::draft(
                &base.name,
                base.entity_type,
                target,
                data,
            ))
        })?;

        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityUpdated, &created),
        );
        Ok(created)
    }

    /// Make an existing version active; every stored version is already valid
    pub fn activate(&self, group_id: &GroupId, version_number: u32) -> Result<ConfigurationVersion> {
        let activated = self.versions.set_active(group_id, version_number)?;
        emit(
            self.publisher.as_ref(),
            RegistryEvent::for_version(EventKind::EntityUpdated, &activated),
        );
        Ok(activated)
    }

    pub fn retire(&self, group_id: &GroupId) -> Result<usize> {
        let count = self.versions.delete_group(group_id)?;
        if count > 0 {
            info!(group_id = %group_id, count, "Retired configuration group");
            emit(
                self.publisher.as_ref(),
                RegistryEvent::deleted(EntityKind::Configuration, group_id.clone(), count),
            );
        }
        Ok(count)
    }

    /// Validate a stored version against its pinned schema version again
    pub fn revalidate(&self, unique_id: &VersionId) -> Result<ValidationReport> {
        let configuration = self
            .versions
            .get_by_id(unique_id)?
            .ok_or_else(|| RegistryError::EntityNotFound {
                kind: EntityKind::Configuration,
                unique_id: unique_id.clone(),
            })?;
        self.schemas
            .validate(&configuration.target_schema_version_id, &configuration.data)
    }

    pub fn get_active(&self, group_id: &GroupId) -> Result<Option<ConfigurationVersion>> {
        self.versions.get_active(group_id)
    }

    pub fn get_version(
        &self,
        group_id: &GroupId,
        version_number: u32,
    ) -> Result<Option<ConfigurationVersion>> {
        self.versions.get_by_version(group_id, version_number)
    }

    pub fn get_by_id(&self, unique_id: &VersionId) -> Result<Option<ConfigurationVersion>> {
        self.versions.get_by_id(unique_id)
    }

    pub fn list_versions(&self, group_id: &GroupId) -> Result<Vec<ConfigurationVersion>> {
        self.versions.list_versions(group_id)
    }

    /// Active version of every group, ordered by name
    pub fn list_active(&self, entity_type: Option<EntityType>) -> Result<Vec<ConfigurationVersion>> {
        let mut filter = Filter::new().eq(fields::IS_ACTIVE, true);
        if let Some(entity_type) = entity_type {
            filter = filter.eq(fields::ENTITY_TYPE, entity_type.as_str());
        }
        self.versions
            .find(&filter, Some(&Sort::ascending(fields::NAME)), None)
    }

    /// Highest version of the group named `name` among those pinned to `target`
    pub fn find_by_name(&self, name: &str, target: &VersionId) -> Result<Option<ConfigurationVersion>> {
        let filter = Filter::new()
            .eq_ignore_case(fields::NAME, name)
            .eq(fields::TARGET_SCHEMA_VERSION_ID, target.as_str());
        let mut found = self.versions.find(
            &filter,
            Some(&Sort::descending(fields::VERSION_NUMBER)),
            Some(1),
        )?;
        Ok(found.pop())
    }

    /// Every configuration version pinned to one schema version
    pub fn list_for_schema_version(&self, schema_unique_id: &VersionId) -> Result<Vec<ConfigurationVersion>> {
        let filter = Filter::new().eq(fields::TARGET_SCHEMA_VERSION_ID, schema_unique_id.as_str());
        self.versions
            .find(&filter, Some(&Sort::ascending(fields::NAME)), None)
    }

    fn resolve_target(&self, target: &VersionId, entity_type: EntityType) -> Result<SchemaVersion> {
        let schema = self.schemas.require(target)?;
        if schema.entity_type != entity_type {
            return Err(RegistryError::TypeMismatch {
                expected: schema.entity_type,
                actual: entity_type,
            });
        }
        Ok(schema)
    }
}
