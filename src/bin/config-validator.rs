//! # Delivery Configuration Validator
//!
//! Command-line tool for checking delivery configuration before a service
//! starts. Loads the same layered sources the library does (files plus
//! `CHATFLOW__*` environment variables), validates them and prints the
//! effective configuration.

use anyhow::Context;
use chatflow_core::config::{ConfigLoader, FallbackConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate delivery configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (development, test, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Directory holding delivery.{toml,yaml,json} and its environment overlays
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Additional configuration file layered on top of the directory
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Ignore CHATFLOW__* environment variables
    #[arg(long)]
    no_env: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate, reporting the result (default)
    Validate,

    /// Print the effective configuration as JSON
    Show,

    /// Print the built-in defaults as JSON
    Defaults,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Defaults) => print_json(&FallbackConfig::default()),
    };

    match result {
        Ok(()) => {
            info!("Configuration check completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration check failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn loader_for(cli: &Cli) -> ConfigLoader {
    let mut loader = ConfigLoader::new();
    if let Some(directory) = &cli.config_dir {
        loader = loader.with_directory(directory);
    }
    if let Some(environment) = &cli.environment {
        loader = loader.with_environment(environment);
    }
    if let Some(file) = &cli.file {
        loader = loader.with_file(file);
    }
    if cli.no_env {
        loader = loader.without_environment_overrides();
    }
    loader
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating delivery configuration");
    if let Some(directory) = &cli.config_dir {
        println!("Config Directory: {}", directory.display());
    }
    if let Some(file) = &cli.file {
        println!("Config File: {}", file.display());
    }

    let config = loader_for(cli)
        .load()
        .context("failed to load delivery configuration")?;

    println!("✅ Configuration loaded and validated");
    println!("   polling interval:      {:?}", config.polling_interval());
    println!("   health check interval: {:?}", config.health_check_interval());
    println!("   fetch timeout:         {:?}", config.fetch_timeout());
    println!(
        "   retry backoff:         x{} up to {:?} after {} retries",
        config.backoff_multiplier,
        config.max_backoff_delay(),
        config.max_retries
    );
    println!(
        "   failure threshold:     {} consecutive push failures",
        config.tuning.failure_threshold
    );
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let config = loader_for(cli)
        .load()
        .context("failed to load delivery configuration")?;
    print_json(&config)
}

fn print_json(config: &FallbackConfig) -> anyhow::Result<()> {
    let rendered =
        serde_json::to_string_pretty(config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
