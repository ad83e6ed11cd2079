//! devfleet - Main Entry Point
//!
//! Loads a fleet file and either runs the manager against real brokers or
//! checks every device's connection method offline.

use clap::{Parser, Subcommand};
use devfleet::config::FleetConfig;
use devfleet::fleet::{ConnectionResolver, FleetManager};
use devfleet::observability::{init_default_logging, init_logging, LogFormat};
use devfleet::transport::mqtt::RumqttTransport;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Level};

/// Multi-device MQTT connection manager
#[derive(Parser)]
#[command(name = "devfleet")]
#[command(about = "Keeps a fleet of MQTT device sessions connected")]
#[command(version)]
struct Cli {
    /// Fleet configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "devfleet.toml",
        env = "DEVFLEET_CONFIG"
    )]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every enabled device and keep the sessions alive
    Run,
    /// Resolve every device's connection method without connecting
    Check,
    /// Validate configuration
    Config {
        /// Show the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, log_format_from_env(), false),
        _ => init_logging(Level::TRACE, log_format_from_env(), true),
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_fleet(config).await,
        Commands::Check => check_devices(&config),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn log_format_from_env() -> LogFormat {
    LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
}

fn load_configuration(path: &Path) -> Result<FleetConfig, devfleet::ConfigError> {
    info!("Loading configuration from: {}", path.display());
    FleetConfig::load_from_file(path)
}

async fn run_fleet(config: FleetConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Starting devfleet v{} with {} device(s)",
        env!("CARGO_PKG_VERSION"),
        config.devices.len()
    );

    let fleet = FleetManager::start(config, Arc::new(RumqttTransport::new())).await;
    fleet
        .on_message(|dev_id, payload| println!("[{dev_id}] {payload}"))
        .await;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    if let Some(teardown) = fleet.stop() {
        teardown.await?;
    }

    for (dev_id, status) in fleet.status().await {
        info!(dev_id = %dev_id, status = %status, "Final device status");
    }
    Ok(())
}

fn check_devices(config: &FleetConfig) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = ConnectionResolver::new(&config.manager);
    let mut failed_enabled = 0;

    for device in &config.devices {
        let state = if device.status { "enabled" } else { "disabled" };
        match resolver.resolve(device) {
            Ok(session) => println!(
                "ok      {} ({}, {}) -> {}:{}",
                device.dev_id,
                session.method(),
                state,
                device.endpoint,
                device.port
            ),
            Err(e) => {
                println!("error   {} ({}): {}", device.dev_id, state, e);
                if device.status {
                    failed_enabled += 1;
                }
            }
        }
    }

    if failed_enabled > 0 {
        return Err(format!("{failed_enabled} enabled device(s) cannot be resolved").into());
    }
    Ok(())
}

fn handle_config_command(
    config: &FleetConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        let enabled = config.devices.iter().filter(|d| d.status).count();
        println!(
            "Configuration is valid: {} device(s), {} enabled",
            config.devices.len(),
            enabled
        );
    }
    Ok(())
}
