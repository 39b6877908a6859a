//! Referential integrity between configurations and schema versions
//!
//! A configuration pins one schema version by `uniqueId`. A schema group may
//! only be retired while no stored configuration version, active or not,
//! pins any of its versions.
//!
//! Configuration writes hold a shared *pin* while they resolve their target
//! and insert; retirement holds the pin exclusively across its reference
//! count and delete, so a configuration cannot slip in between the two.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::model::{fields, ConfigurationVersion, GroupId, SchemaVersion};
use crate::store::Filter;
use crate::version_store::VersionStore;

pub struct ReferentialGuard {
    schemas: Arc<VersionStore<SchemaVersion>>,
    configurations: Arc<VersionStore<ConfigurationVersion>>,
    pins: RwLock<()>,
}

impl ReferentialGuard {
    pub fn new(
        schemas: Arc<VersionStore<SchemaVersion>>,
        configurations: Arc<VersionStore<ConfigurationVersion>>,
    ) -> Self {
        Self {
            schemas,
            configurations,
            pins: RwLock::new(()),
        }
    }

    /// Configurations pinned to any version of the schema group
    pub fn count_configurations_referencing(&self, schema_group_id: &GroupId) -> Result<usize> {
        let versions = self.schemas.list_versions(schema_group_id)?;
        self.count_referencing(&versions)
    }

    /// Configurations pinned to any of the given schema versions
    pub fn count_referencing(&self, versions: &[SchemaVersion]) -> Result<usize> {
        if versions.is_empty() {
            return Ok(0);
        }
        let ids = versions.iter().map(|v| v.unique_id().as_str().to_string());
        let count = self
            .configurations
            .count(&Filter::new().any_of(fields::TARGET_SCHEMA_VERSION_ID, ids))?;
        debug!(versions = versions.len(), count, "Counted configuration references");
        Ok(count)
    }

    /// Fail with `ReferencedEntity` while anything pins these versions
    pub fn ensure_unreferenced(&self, group_id: &GroupId, versions: &[SchemaVersion]) -> Result<()> {
        match self.count_referencing(versions)? {
            0 => Ok(()),
            count => Err(RegistryError::ReferencedEntity {
                group_id: group_id.clone(),
                count,
            }),
        }
    }

    /// Shared hold taken by configuration writes
    pub fn pin(&self) -> RwLockReadGuard<'_, ()> {
        self.pins.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive hold taken by schema retirement
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.pins.write().unwrap_or_else(PoisonError::into_inner)
    }
}
