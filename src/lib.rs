//! Config Registry
//!
//! A versioned registry of JSON-Schema documents and of the configuration
//! objects validated by them.
//!
//! ## Features
//!
//! - **Linear Versions**: every schema and configuration is a group of versions `1..=n`
//!   with at most one active version
//! - **Pinning**: a configuration references one exact schema version, so later schema
//!   revisions never invalidate it
//! - **Referential Integrity**: a schema group cannot be retired while any configuration
//!   version pins one of its versions
//! - **Validator Cache**: compiled validators are memoized per schema version
//! - **Checksums**: SHA256 checksums of every schema document
//!
//! ## Architecture
//!
//! ```text
//! ConfigurationRegistry ──► SchemaRegistry ──► ValidatorCache
//!          │                     │
//!          │             ReferentialGuard
//!          ▼                     ▼
//!   VersionStore<ConfigurationVersion>   VersionStore<SchemaVersion>
//!                    └──────► DocumentStore ◄──────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use config_registry::{EntityType, MemoryStore, Registries};
//! use serde_json::json;
//!
//! let registries = Registries::new(Arc::new(MemoryStore::new())).unwrap();
//! let schema = registries
//!     .schemas
//!     .register("S", EntityType::Signal, json!({"type": "object", "required": ["x"]}), None)
//!     .unwrap();
//! let config = registries
//!     .configurations
//!     .register("C", EntityType::Signal, schema.unique_id(), json!({"x": 1}))
//!     .unwrap();
//! assert!(registries.configurations.revalidate(config.unique_id()).unwrap().valid);
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod migration;
pub mod model;
pub mod registry;
pub mod seed;
pub mod store;
pub mod validator;
pub mod version_store;

pub use checksum::Checksum;
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use events::{ChannelPublisher, EventKind, EventPublisher, LogPublisher, NoopPublisher, RegistryEvent};
pub use guard::ReferentialGuard;
pub use model::{ConfigurationVersion, EntityKind, EntityType, GroupId, SchemaVersion, VersionId};
pub use registry::{
    ConfigurationRegistry, ConfigurationRevision, Registries, RegistryOptions, SchemaRegistry,
    SchemaRevision,
};
pub use store::{DocumentStore, FileStore, Filter, MemoryStore};
pub use validator::{ConcurrentValidatorCache, ValidationIssue, ValidationReport, ValidatorCache};
pub use version_store::VersionStore;
