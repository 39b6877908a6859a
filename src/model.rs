//! Versioned entity types
//!
//! Schemas and configurations share one version envelope ([`VersionMeta`]):
//! a stable group identity, a per-version identity, a strictly increasing
//! version number and the single active pointer of the group.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::store::Filter;

/// Document field names as persisted in the store
pub mod fields {
    pub const UNIQUE_ID: &str = "uniqueId";
    pub const GROUP_ID: &str = "groupId";
    pub const VERSION_NUMBER: &str = "versionNumber";
    pub const IS_ACTIVE: &str = "isActive";
    pub const ENTITY_TYPE: &str = "entityType";
    pub const NAME: &str = "name";
    pub const ENABLED: &str = "enabled";
    pub const DESCRIPTION: &str = "description";
    pub const DOCUMENT: &str = "document";
    pub const CHECKSUM: &str = "checksum";
    pub const TARGET_SCHEMA_VERSION_ID: &str = "targetSchemaVersionId";
    pub const DATA: &str = "data";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Identity of one exact version, assigned by the store at insertion
///
/// Opaque to the registry: freshly assigned ids are UUIDs, migrated legacy
/// records keep whatever key they were stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Placeholder carried by entities that have not been inserted yet
    pub fn nil() -> Self {
        Self(String::new())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty version id".to_string());
        }
        Ok(Self(s.to_string()))
    }
}

/// Identity shared by every version of one logical schema or configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn nil() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

/// Legacy records used their first version's id as the group id
impl From<VersionId> for GroupId {
    fn from(id: VersionId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GroupId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty group id".to_string());
        }
        Ok(Self(s.to_string()))
    }
}

/// Which versioned collection an entity lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Schema,
    Configuration,
}

impl EntityKind {
    /// Collection name in the document store
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Schema => "schemas",
            EntityKind::Configuration => "configurations",
        }
    }

    pub fn all() -> &'static [EntityKind] {
        &[EntityKind::Schema, EntityKind::Configuration]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Schema => write!(f, "schema"),
            EntityKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// The kind of thing a schema (and every configuration validated by it) describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Signal,
    Device,
    Channel,
    Pipeline,
    Alert,
    Report,
}

impl EntityType {
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Signal,
            EntityType::Device,
            EntityType::Channel,
            EntityType::Pipeline,
            EntityType::Alert,
            EntityType::Report,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Signal => "signal",
            EntityType::Device => "device",
            EntityType::Channel => "channel",
            EntityType::Pipeline => "pipeline",
            EntityType::Alert => "alert",
            EntityType::Report => "report",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        EntityType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

/// Version envelope shared by schemas and configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMeta {
    pub unique_id: VersionId,
    pub group_id: GroupId,
    pub version_number: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionMeta {
    /// Envelope for an entity that has not been placed in a group yet
    pub fn pending() -> Self {
        let now = Utc::now();
        Self {
            unique_id: VersionId::nil(),
            group_id: GroupId::nil(),
            version_number: 0,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Common interface of everything the version store manages
pub trait Versioned: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection this entity kind lives in
    const KIND: EntityKind;

    fn meta(&self) -> &VersionMeta;

    fn meta_mut(&mut self) -> &mut VersionMeta;

    fn name(&self) -> &str;

    /// Matches every stored version whose name collides with this entity's
    fn identity_filter(&self) -> Filter;

    /// Human readable uniqueness scope, used in duplicate-name errors
    fn identity_scope(&self) -> String;
}

/// One version of a registered JSON-Schema document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    #[serde(flatten)]
    pub meta: VersionMeta,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub document: Value,
    pub checksum: Checksum,
}

impl SchemaVersion {
    /// Build an unplaced schema version; the version store assigns its envelope
    pub fn draft(
        name: impl Into<String>,
        entity_type: EntityType,
        document: Value,
        description: Option<String>,
    ) -> Self {
        let checksum = Checksum::from_json(&document);
        Self {
            meta: VersionMeta::pending(),
            name: name.into(),
            entity_type,
            enabled: true,
            description,
            document,
            checksum,
        }
    }

    pub fn unique_id(&self) -> &VersionId {
        &self.meta.unique_id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.meta.group_id
    }

    pub fn version_number(&self) -> u32 {
        self.meta.version_number
    }

    pub fn is_active(&self) -> bool {
        self.meta.is_active
    }
}

impl Versioned for SchemaVersion {
    const KIND: EntityKind = EntityKind::Schema;

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn identity_filter(&self) -> Filter {
        Filter::new()
            .eq_ignore_case(fields::NAME, &self.name)
            .eq(fields::ENTITY_TYPE, self.entity_type.as_str())
    }

    fn identity_scope(&self) -> String {
        format!("type {}", self.entity_type)
    }
}

/// One version of a configuration object pinned to one schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationVersion {
    #[serde(flatten)]
    pub meta: VersionMeta,
    pub name: String,
    pub entity_type: EntityType,
    pub target_schema_version_id: VersionId,
    pub data: Value,
}

impl ConfigurationVersion {
    pub fn draft(
        name: impl Into<String>,
        entity_type: EntityType,
        target_schema_version_id: VersionId,
        data: Value,
    ) -> Self {
        Self {
            meta: VersionMeta::pending(),
            name: name.into(),
            entity_type,
            target_schema_version_id,
            data,
        }
    }

    pub fn unique_id(&self) -> &VersionId {
        &self.meta.unique_id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.meta.group_id
    }

    pub fn version_number(&self) -> u32 {
        self.meta.version_number
    }

    pub fn is_active(&self) -> bool {
        self.meta.is_active
    }
}

impl Versioned for ConfigurationVersion {
    const KIND: EntityKind = EntityKind::Configuration;

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn identity_filter(&self) -> Filter {
        Filter::new()
            .eq_ignore_case(fields::NAME, &self.name)
            .eq(
                fields::TARGET_SCHEMA_VERSION_ID,
                self.target_schema_version_id.as_str(),
            )
    }

    fn identity_scope(&self) -> String {
        format!("schema version {}", self.target_schema_version_id)
    }
}

fn default_true() -> bool {
    true
}
