//! Zapgate CLI
//!
//! Command-line interface for the zapgate bot

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use zapgate_config::{ActionLimits, Config};
use zapgate_core::ZapgateRuntime;

const CONFIG_TEMPLATE: &str = include_str!("../../../config/config.example.toml");

#[derive(Parser)]
#[command(name = "zapgate")]
#[command(about = "Cooldown-gated Telegram remote for OpenShock devices", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides core.log_level from the config file)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground
    Start,

    /// Write a template config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the config file and print a summary
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(cli.config)?;
            let data_dir = config.core.data_dir()?;
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
            let log_dir = data_dir.join("logs");
            let log_level = cli
                .log_level
                .as_deref()
                .or(config.core.log_level.as_deref())
                .unwrap_or("info");
            let _logging_guard = logging::init_logging(&log_dir, log_level)?;

            info!("Starting Zapgate runtime in foreground...");
            let runtime = ZapgateRuntime::new(config);
            runtime.run().await
        }

        Commands::Init { force } => init_config(cli.config, force),

        Commands::Check => check_config(cli.config),
    }
}

fn load_config(config_path: Option<String>) -> Result<Config> {
    if let Some(path) = config_path {
        Config::load(&path).with_context(|| format!("Failed to load config from {}", path))
    } else if let Some(default_path) = Config::default_path() {
        Config::load(&default_path).with_context(|| {
            format!(
                "Failed to load config from {} (run `zapgate init` to create one)",
                default_path.display()
            )
        })
    } else {
        anyhow::bail!("No config file found")
    }
}

fn resolve_config_path(config_path: Option<String>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        Ok(PathBuf::from(path))
    } else {
        Config::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }
}

fn init_config(config_path: Option<String>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, CONFIG_TEMPLATE)?;

    println!("Configuration created at: {}", path.display());
    println!("\nEdit the file to add your OpenShock API token, shocker id,");
    println!("and Telegram bot token, then run:");
    println!("  zapgate check   - Validate the configuration");
    println!("  zapgate start   - Run the bot");

    Ok(())
}

fn check_config(config_path: Option<String>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    println!("Config OK: {}", path.display());
    println!("  Device:      {}", config.openshock.device_id);
    println!(
        "  Access mode: {:?} ({} ids)",
        config.access.mode,
        config.access.ids.resolve().len()
    );
    print_limits("shock", &config.limits.shock);
    print_limits("vibrate", &config.limits.vibrate);

    Ok(())
}

fn print_limits(name: &str, limits: &ActionLimits) {
    println!(
        "  {:<12} {}-{}% for {}-{}ms, cooldown {}s",
        format!("{}:", name),
        limits.strength_min,
        limits.strength_max,
        limits.duration_min_ms,
        limits.duration_max_ms,
        limits.cooldown_secs
    );
}
