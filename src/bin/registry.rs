//! Config Registry CLI
//!
//! Manage schema and configuration versions stored by the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use config_registry::config::StoreBackend;
use config_registry::{
    seed, ConfigurationRevision, DocumentStore, EntityType, EventPublisher, FileStore, GroupId,
    LogPublisher, MemoryStore, NoopPublisher, Registries, RegistryConfig, SchemaRevision,
    ValidationReport, VersionId,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "config-registry")]
#[command(about = "Versioned JSON-Schema and configuration registry")]
struct Cli {
    /// Config file layered over the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage schemas
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },

    /// Manage configurations
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Create missing schemas and configurations from a seed directory
    Seed {
        /// Seed directory (defaults to [seed].dir)
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Register a new schema from a JSON-Schema file
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short = 't', long = "type")]
        entity_type: EntityType,
        /// JSON-Schema document
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Create the next version of a schema
    Revise {
        group: GroupId,
        /// New JSON-Schema document
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Make a version the active one
    Activate { group: GroupId, version: u32 },

    /// Include a schema in selectable listings
    Enable { group: GroupId },

    /// Exclude a schema from selectable listings
    Disable { group: GroupId },

    /// Delete every version of an unreferenced schema
    Retire { group: GroupId },

    /// Print one version (the active one by default)
    Show {
        group: GroupId,
        #[arg(short, long)]
        version: Option<u32>,
    },

    /// List every version of a schema
    Versions { group: GroupId },

    /// List active schemas
    List {
        #[arg(short = 't', long = "type")]
        entity_type: Option<EntityType>,
        /// Include disabled schemas
        #[arg(short, long)]
        all: bool,
    },

    /// Validate a JSON file against one schema version
    Validate {
        /// Schema version uniqueId
        schema: VersionId,
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Diff the documents of two versions
    Diff { group: GroupId, from: u32, to: u32 },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Register a configuration pinned to a schema version
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short = 't', long = "type")]
        entity_type: EntityType,
        /// Target schema version uniqueId
        #[arg(short = 's', long)]
        target: VersionId,
        /// Configuration data
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Create the next version of a configuration
    Revise {
        group: GroupId,
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Re-pin to another schema version
        #[arg(short = 's', long)]
        target: Option<VersionId>,
    },

    /// Make a version the active one
    Activate { group: GroupId, version: u32 },

    /// Delete every version of a configuration
    Retire { group: GroupId },

    /// Print one version (the active one by default)
    Show {
        group: GroupId,
        #[arg(short, long)]
        version: Option<u32>,
    },

    /// List every version of a configuration
    Versions { group: GroupId },

    /// List active configurations
    List {
        #[arg(short = 't', long = "type", conflicts_with = "schema")]
        entity_type: Option<EntityType>,
        /// Only those pinned to this schema version
        #[arg(short = 's', long)]
        schema: Option<VersionId>,
    },

    /// Re-validate a stored version against its pinned schema version
    Revalidate { unique_id: VersionId },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    let registries = open(&config)?;

    match cli.command {
        Commands::Schema { command } => run_schema(&registries, command),
        Commands::Config { command } => run_config(&registries, command),
        Commands::Seed { dir } => {
            let dir = dir
                .or_else(|| config.seed.dir.clone())
                .ok_or_else(|| anyhow!("No seed directory given and [seed].dir is not set"))?;

            println!("🌱 Seeding from {}", dir.display());
            let report = seed::load_directory(&dir, &registries.schemas, &registries.configurations);
            println!("  ✅ {} created, {} skipped", report.created, report.skipped);
            for label in &report.drifted {
                println!("  ⚠️  {} differs from its seed file", label);
            }
            for failure in &report.failures {
                println!("  ❌ {}: {}", failure.path.display(), failure.message);
            }

            if !report.failures.is_empty() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn open(config: &RegistryConfig) -> anyhow::Result<Registries> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => {
            let path = config.store_path();
            info!(path = %path.display(), "Opening file store");
            Arc::new(FileStore::open(&path).with_context(|| format!("Failed to open store at {}", path.display()))?)
        }
    };
    let publisher: Arc<dyn EventPublisher> = if config.events.log {
        Arc::new(LogPublisher)
    } else {
        Arc::new(NoopPublisher)
    };

    Ok(Registries::builder(store)
        .publisher(publisher)
        .options(config.registry_options())
        .build()?)
}

fn run_schema(registries: &Registries, command: SchemaCommand) -> anyhow::Result<()> {
    let schemas = &registries.schemas;

    match command {
        SchemaCommand::Register {
            name,
            entity_type,
            file,
            description,
        } => {
            let schema = schemas.register(&name, entity_type, read_json(&file)?, description)?;
            println!(
                "✅ Registered {} ({}) v{}",
                schema.name,
                schema.entity_type,
                schema.version_number()
            );
            println!("   group:    {}", schema.group_id());
            println!("   uniqueId: {}", schema.unique_id());
            println!("   checksum: {}", schema.checksum.short());
        }

        SchemaCommand::Revise {
            group,
            file,
            description,
        } => {
            let revision = SchemaRevision {
                document: file.as_deref().map(read_json).transpose()?,
                description,
                ..SchemaRevision::default()
            };
            let schema = schemas.revise(&group, revision)?;
            println!("✅ Created {} v{}", schema.name, schema.version_number());
            println!("   uniqueId: {}", schema.unique_id());
        }

        SchemaCommand::Activate { group, version } => {
            let schema = schemas.activate(&group, version)?;
            println!("✅ {} v{} is now active", schema.name, schema.version_number());
        }

        SchemaCommand::Enable { group } => {
            let schema = schemas.set_enabled(&group, true)?;
            println!("✅ {} enabled", schema.name);
        }

        SchemaCommand::Disable { group } => {
            let schema = schemas.set_enabled(&group, false)?;
            println!("✅ {} disabled", schema.name);
        }

        SchemaCommand::Retire { group } => {
            let count = schemas.retire(&group)?;
            if count == 0 {
                println!("Nothing to retire for {}", group);
            } else {
                println!("🗑️  Retired {} version(s) of {}", count, group);
            }
        }

        SchemaCommand::Show { group, version } => {
            let schema = match version {
                Some(n) => schemas.get_version(&group, n)?,
                None => schemas.get_active(&group)?,
            }
            .ok_or_else(|| anyhow!("No such schema version in group {}", group))?;
            print_json(&schema)?;
        }

        SchemaCommand::Versions { group } => {
            for schema in schemas.list_versions(&group)? {
                println!(
                    "  {} v{:<4} {}  {}",
                    if schema.is_active() { "●" } else { " " },
                    schema.version_number(),
                    schema.unique_id(),
                    schema.checksum.short()
                );
            }
        }

        SchemaCommand::List { entity_type, all } => {
            let listed = if all {
                schemas.list_active(entity_type)?
            } else {
                schemas.list_selectable(entity_type)?
            };
            println!("📋 {} schema(s)", listed.len());
            for schema in listed {
                println!(
                    "  {:<24} {:<10} v{:<4} {}{}",
                    schema.name,
                    schema.entity_type,
                    schema.version_number(),
                    schema.group_id(),
                    if schema.enabled { "" } else { "  (disabled)" }
                );
            }
        }

        SchemaCommand::Validate { schema, file } => {
            let report = schemas.validate(&schema, &read_json(&file)?)?;
            print_report(&report);
        }

        SchemaCommand::Diff { group, from, to } => {
            print!("{}", schemas.diff_versions(&group, from, to)?);
        }
    }
    Ok(())
}

fn run_config(registries: &Registries, command: ConfigCommand) -> anyhow::Result<()> {
    let configurations = &registries.configurations;

    match command {
        ConfigCommand::Register {
            name,
            entity_type,
            target,
            file,
        } => {
            let configuration = configurations.register(&name, entity_type, &target, read_json(&file)?)?;
            println!("✅ Registered {} v{}", configuration.name, configuration.version_number());
            println!("   group:    {}", configuration.group_id());
            println!("   uniqueId: {}", configuration.unique_id());
        }

        ConfigCommand::Revise { group, file, target } => {
            let revision = ConfigurationRevision {
                data: file.as_deref().map(read_json).transpose()?,
                target_schema_version_id: target,
                ..ConfigurationRevision::default()
            };
            let configuration = configurations.revise(&group, revision)?;
            println!(
                "✅ Created {} v{} pinned to {}",
                configuration.name,
                configuration.version_number(),
                configuration.target_schema_version_id
            );
        }

        ConfigCommand::Activate { group, version } => {
            let configuration = configurations.activate(&group, version)?;
            println!("✅ {} v{} is now active", configuration.name, configuration.version_number());
        }

        ConfigCommand::Retire { group } => {
            let count = configurations.retire(&group)?;
            println!("🗑️  Retired {} version(s) of {}", count, group);
        }

        ConfigCommand::Show { group, version } => {
            let configuration = match version {
                Some(n) => configurations.get_version(&group, n)?,
                None => configurations.get_active(&group)?,
            }
            .ok_or_else(|| anyhow!("No such configuration version in group {}", group))?;
            print_json(&configuration)?;
        }

        ConfigCommand::Versions { group } => {
            for configuration in configurations.list_versions(&group)? {
                println!(
                    "  {} v{:<4} {}  -> {}",
                    if configuration.is_active() { "●" } else { " " },
                    configuration.version_number(),
                    configuration.unique_id(),
                    configuration.target_schema_version_id
                );
            }
        }

        ConfigCommand::List { entity_type, schema } => {
            let listed = match schema {
                Some(target) => configurations.list_for_schema_version(&target)?,
                None => configurations.list_active(entity_type)?,
            };
            println!("📋 {} configuration(s)", listed.len());
            for configuration in listed {
                println!(
                    "  {:<24} {:<10} v{:<4} {}",
                    configuration.name,
                    configuration.entity_type,
                    configuration.version_number(),
                    configuration.group_id()
                );
            }
        }

        ConfigCommand::Revalidate { unique_id } => {
            let report = configurations.revalidate(&unique_id)?;
            print_report(&report);
        }
    }
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &ValidationReport) {
    if report.valid {
        println!("✅ Valid");
        return;
    }
    println!("❌ {} violation(s)", report.errors.len());
    for issue in &report.errors {
        println!("   └─ {}", issue);
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_list_filters_are_exclusive() {
        let parse = |args: &[&str]| {
            Cli::try_parse_from(["config-registry", "config", "list"].iter().chain(args))
        };

        assert!(parse(&["--type", "signal"]).is_ok());
        assert!(parse(&["--schema", "abc"]).is_ok());
        assert!(parse(&["-t", "signal", "-s", "abc"]).is_err());
    }
}
