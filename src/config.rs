//! Configuration for the registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (CONFIG_REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [store]
//! backend = "file"
//! path = "./registry-data"
//!
//! [validation]
//! warm_cache = true
//! max_errors = 64
//!
//! [events]
//! log = true
//!
//! [seed]
//! dir = "./seed"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::registry::RegistryOptions;
use crate::validator::DEFAULT_MAX_ERRORS;

/// Main configuration for the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub seed: SeedConfig,
}

/// Which document store backs the registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on exit
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory holding one JSON file per collection
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Compile validators when a schema version is registered or activated
    #[serde(default = "default_true")]
    pub warm_cache: bool,

    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventsConfig {
    /// Log every registry event
    #[serde(default)]
    pub log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeedConfig {
    /// Directory seeded when `seed` runs without an explicit path
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_store_path() -> PathBuf {
    PathBuf::from("registry-data")
}

fn default_true() -> bool {
    true
}

fn default_max_errors() -> usize {
    DEFAULT_MAX_ERRORS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            warm_cache: true,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering `config_path` over the default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "config-registry") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // CONFIG_REGISTRY__STORE__PATH=... overrides store.path
        builder = builder.add_source(
            Environment::with_prefix("CONFIG_REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Store path, resolved against the working directory when relative
    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.store.path)
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            warm_cache: self.validation.warm_cache,
            max_errors: self.validation.max_errors,
        }
    }
}
