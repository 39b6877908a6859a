//! Schema and configuration registries
//!
//! [`Registries`] wires both registries onto one document store, sharing the
//! validator cache, the referential guard and the event publisher.

pub mod configuration;
pub mod schema;

use std::sync::Arc;

use crate::error::Result;
use crate::events::{EventPublisher, NoopPublisher};
use crate::guard::ReferentialGuard;
use crate::model::{ConfigurationVersion, SchemaVersion};
use crate::store::DocumentStore;
use crate::validator::{ConcurrentValidatorCache, ValidatorCache, DEFAULT_MAX_ERRORS};
use crate::version_store::VersionStore;

pub use configuration::{ConfigurationRegistry, ConfigurationRevision};
pub use schema::{SchemaRegistry, SchemaRevision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Compile validators eagerly on register and activate
    pub warm_cache: bool,
    /// Cap on violations reported by one validation
    pub max_errors: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            warm_cache: true,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

/// Both registries over one store
pub struct Registries {
    pub schemas: Arc<SchemaRegistry>,
    pub configurations: ConfigurationRegistry,
    guard: Arc<ReferentialGuard>,
}

impl Registries {
    /// Registries with a fresh cache, no event delivery and default options
    pub fn new(store: Arc<dyn DocumentStore>) -> Result<Self> {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn DocumentStore>) -> RegistriesBuilder {
        RegistriesBuilder {
            store,
            cache: None,
            publisher: None,
            options: RegistryOptions::default(),
        }
    }

    pub fn guard(&self) -> &ReferentialGuard {
        &self.guard
    }
}

pub struct RegistriesBuilder {
    store: Arc<dyn DocumentStore>,
    cache: Option<Arc<dyn ValidatorCache>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    options: RegistryOptions,
}

impl RegistriesBuilder {
    pub fn cache(mut self, cache: Arc<dyn ValidatorCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Registries> {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ConcurrentValidatorCache::new()));
        let publisher = self.publisher.unwrap_or_else(|| Arc::new(NoopPublisher));

        let schema_versions = Arc::new(VersionStore::<SchemaVersion>::new(Arc::clone(&self.store)));
        let configuration_versions =
            Arc::new(VersionStore::<ConfigurationVersion>::new(Arc::clone(&self.store)));
        let guard = Arc::new(ReferentialGuard::new(
            Arc::clone(&schema_versions),
            Arc::clone(&configuration_versions),
        ));

        let schemas = Arc::new(SchemaRegistry::new(
            schema_versions,
            cache,
            Arc::clone(&guard),
            Arc::clone(&publisher),
            self.options,
        )?);
        let configurations = ConfigurationRegistry::new(
            configuration_versions,
            Arc::clone(&schemas),
            Arc::clone(&guard),
            publisher,
        );

        Ok(Registries {
            schemas,
            configurations,
            guard,
        })
    }
}
