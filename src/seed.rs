//! Bulk seeding from a directory of JSON files
//!
//! ```text
//! seed/
//! ├── schemas/
//! │   └── temperature.json      { name, entityType, description?, document }
//! └── configurations/
//!     └── sensor-a.json         { name, entityType, schemaName, schemaVersion?, data }
//! ```
//!
//! Seeding is create-if-absent: entries that already exist are skipped, never
//! revised. A stored schema whose document differs from its seed file is
//! reported as drifted. Failures are collected per file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checksum::Checksum;
use crate::model::EntityType;
use crate::registry::{ConfigurationRegistry, SchemaRegistry};

pub const SCHEMAS_DIR: &str = "schemas";
pub const CONFIGURATIONS_DIR: &str = "configurations";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSeed {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: Option<String>,
    pub document: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSeed {
    pub name: String,
    pub entity_type: EntityType,
    pub schema_name: String,
    /// Pin to this version of the schema instead of its active one
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub created: usize,
    pub skipped: usize,
    /// Schemas whose stored document no longer matches the seed file
    pub drifted: Vec<String>,
    pub failures: Vec<SeedFailure>,
}

impl SeedReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.drifted.is_empty()
    }
}

enum Outcome {
    Created,
    Skipped,
    Drifted(String),
}

/// Seed schemas, then configurations, from `dir`
pub fn load_directory(
    dir: &Path,
    schemas: &SchemaRegistry,
    configurations: &ConfigurationRegistry,
) -> SeedReport {
    let mut report = SeedReport::default();

    for path in json_files(&dir.join(SCHEMAS_DIR)) {
        let outcome = read_seed::<SchemaSeed>(&path).and_then(|seed| seed_schema(seed, schemas));
        record(&mut report, path, outcome);
    }
    for path in json_files(&dir.join(CONFIGURATIONS_DIR)) {
        let outcome = read_seed::<ConfigurationSeed>(&path)
            .and_then(|seed| seed_configuration(seed, schemas, configurations));
        record(&mut report, path, outcome);
    }

    info!(
        dir = %dir.display(),
        created = report.created,
        skipped = report.skipped,
        drifted = report.drifted.len(),
        failed = report.failures.len(),
        "Seeding finished"
    );
    report
}

fn seed_schema(seed: SchemaSeed, schemas: &SchemaRegistry) -> Result<Outcome> {
    let existing = schemas
        .find_by_name(&seed.name, seed.entity_type)
        .with_context(|| format!("Failed to look up schema '{}'", seed.name))?;

    match existing {
        Some(stored) if stored.checksum == Checksum::from_json(&seed.document) => Ok(Outcome::Skipped),
        Some(stored) => Ok(Outcome::Drifted(format!(
            "{} ({}) v{}",
            stored.name,
            stored.entity_type,
            stored.version_number()
        ))),
        None => {
            schemas
                .register(&seed.name, seed.entity_type, seed.document, seed.description)
                .with_context(|| format!("Failed to register schema '{}'", seed.name))?;
            Ok(Outcome::Created)
        }
    }
}

fn seed_configuration(
    seed: ConfigurationSeed,
    schemas: &SchemaRegistry,
    configurations: &ConfigurationRegistry,
) -> Result<Outcome> {
    let ConfigurationSeed {
        name,
        entity_type,
        schema_name,
        schema_version,
        data,
    } = seed;

    let schema = schemas
        .find_by_name(&schema_name, entity_type)
        .with_context(|| format!("Failed to look up schema '{}'", schema_name))?
        .ok_or_else(|| anyhow!("Unknown {} schema '{}'", entity_type, schema_name))?;
    let target = match schema_version {
        Some(n) if n != schema.version_number() => schemas
            .get_version(schema.group_id(), n)
            .with_context(|| format!("Failed to look up schema '{}' v{}", schema_name, n))?
            .ok_or_else(|| anyhow!("Schema '{}' has no version {}", schema_name, n))?,
        _ => schema,
    };

    let existing = configurations
        .find_by_name(&name, target.unique_id())
        .with_context(|| format!("Failed to look up configuration '{}'", name))?;
    if existing.is_some() {
        return Ok(Outcome::Skipped);
    }

    if let Err(e) = configurations.register(&name, entity_type, target.unique_id(), data) {
        let details: Vec<String> = e.issues().iter().map(ToString::to_string).collect();
        let context = match details.as_slice() {
            [] => format!("Failed to register configuration '{}'", name),
            _ => format!("Failed to register configuration '{}' ({})", name, details.join("; ")),
        };
        return Err(anyhow::Error::new(e).context(context));
    }
    Ok(Outcome::Created)
}

fn record(report: &mut SeedReport, path: PathBuf, outcome: Result<Outcome>) {
    match outcome {
        Ok(Outcome::Created) => {
            debug!(path = %path.display(), "Seeded");
            report.created += 1;
        }
        Ok(Outcome::Skipped) => report.skipped += 1,
        Ok(Outcome::Drifted(label)) => {
            warn!(path = %path.display(), schema = %label, "Stored schema differs from seed file");
            report.skipped += 1;
            report.drifted.push(label);
        }
        Err(e) => {
            let message = format!("{:#}", e);
            warn!(path = %path.display(), error = %message, "Failed to seed");
            report.failures.push(SeedFailure { path, message });
        }
    }
}

fn read_seed<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse JSON")
}

/// `.json` files below `dir` in a stable order; a missing dir yields nothing
fn json_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
        .map(|e| e.into_path())
        .collect()
}
