//! wmbusgen - Main entry point
//!
//! Compiles a wM-Bus component configuration into a JSON build plan.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wmbusgen_core::{BuildSession, Catalog, ComponentManifest, UnitTable};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "wmbusgen")]
#[command(about = "Build-time configuration compiler for wM-Bus components")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wmbusgen.toml")]
    config: PathBuf,

    /// Component directory holding the driver catalog
    #[arg(long)]
    components: Option<PathBuf>,

    /// Use this vendored library tag instead of reading git history
    #[arg(long)]
    tag: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a configuration and write its build plan
    Compile {
        /// Component configuration (TOML)
        input: PathBuf,
        /// Write the plan here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the source files a configuration builds
    Resources {
        /// Component configuration (TOML)
        input: PathBuf,
    },
    /// List the drivers in the catalog
    Drivers,
    /// Print the vendored library version tag
    VersionTag,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout carries the command output
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("wmbusgen v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override from command line
    if let Some(path) = args.components {
        config.components.path = path;
    }
    if let Some(tag) = args.tag {
        config.version_tag.tag = Some(tag);
    }

    info!(
        components = %config.components.path.display(),
        "Configuration loaded"
    );

    match args.command {
        Command::Compile { input, output } => compile(&config, &input, output.as_deref()),
        Command::Resources { input } => resources(&config, &input),
        Command::Drivers => drivers(&config),
        Command::VersionTag => {
            let resolver = config.tag_resolver();
            println!("{}", resolver.tag()?);
            Ok(())
        }
    }
}

fn load_catalog(config: &Config) -> Result<Catalog> {
    Catalog::load(&config.components.path, config.components.name_pattern())
        .context("Failed to load the driver catalog")
}

fn manifest(config: &Config) -> ComponentManifest {
    ComponentManifest::new(&config.components.path, config.components.name_pattern())
        .with_extensions(config.components.source_extensions.iter().cloned())
}

fn read_tree(input: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", input.display()))
}

fn new_session(config: &Config) -> Result<BuildSession> {
    let units = UnitTable::load(&config.components.units_path())
        .context("Failed to load the unit list")?;
    Ok(BuildSession::new(
        load_catalog(config)?,
        config.components.sentinels.iter().cloned(),
        config.tag_resolver(),
    )
    .with_units(units))
}

fn compile(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let tree = read_tree(input)?;
    let mut session = new_session(config)?;
    let plan = session.compile(&tree, &manifest(config))?;
    let json = plan.to_json(config.output.pretty)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                path = %path.display(),
                operations = plan.operations.len(),
                resources = plan.resources.len(),
                "Build plan written"
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn resources(config: &Config, input: &Path) -> Result<()> {
    let tree = read_tree(input)?;
    let mut session = new_session(config)?;
    session.validate(&tree)?;
    for resource in session.list_build_resources(&manifest(config))? {
        println!("{}", resource.path.display());
    }
    Ok(())
}

fn drivers(config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    for name in catalog.names() {
        if config.components.sentinels.iter().any(|s| s == name) {
            println!("{} (fallback)", name);
        } else {
            println!("{}", name);
        }
    }
    Ok(())
}
