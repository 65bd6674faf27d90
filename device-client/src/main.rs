//! # Thing Vending Device Client CLI
//!
//! Command-line tool for device operations:
//! - Register the device with the Identity Service
//! - Check that the registration endpoint is alive
//! - Show the stored registration
//!
//! ## Usage
//!
//! ```bash
//! # Register a new device
//! device-client register --thing-name Sensor-01 --account-token acc-123 --version 1.2.0
//!
//! # Liveness check
//! device-client ping
//!
//! # Show the stored registration
//! device-client show
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use device_client::{
    registration::{parse_attributes, report_failure},
    DeviceRegistrar, SecureStorage,
};
use shared::{
    config::DeviceClientConfig,
    constants::{ENV_DEVICE_STORAGE_PATH, ENV_LOG_LEVEL},
};

/// Default storage directory under the user's home
const DEVICE_STORAGE_DIR: &str = ".thing-vending-device";

#[derive(Parser)]
#[command(name = "device-client")]
#[command(about = "Thing Vending device client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Identity Service URL
    #[arg(long, env = "IDENTITY_SERVICE_URL", default_value = "http://localhost:8080")]
    identity_service: String,

    /// Directory for the certificate and keys
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register this device with the Identity Service
    Register {
        /// Unique thing name
        #[arg(long, short = 'n')]
        thing_name: String,

        /// Account token
        #[arg(long, short = 'a')]
        account_token: String,

        /// Agent version
        #[arg(long, short = 'v', default_value = env!("CARGO_PKG_VERSION"))]
        version: String,

        /// Extra attributes as key=value (repeatable)
        #[arg(long = "attribute")]
        attributes: Vec<String>,

        /// Discard any stored registration first
        #[arg(long)]
        force: bool,
    },

    /// Check that the registration endpoint is alive
    Ping,

    /// Show the stored registration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL).unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder().with_env_filter(filter).init();

    let cli = Cli::parse();

    // Build config
    let mut config = DeviceClientConfig::from_env();
    config.identity_service_url = cli.identity_service;
    config.storage.data_path = resolve_data_dir(cli.data_dir, config.storage.data_path);

    match cli.command {
        Commands::Register {
            thing_name,
            account_token,
            version,
            attributes,
            force,
        } => {
            register_device(&config, &thing_name, &account_token, &version, &attributes, force).await?;
        }
        Commands::Ping => {
            ping_service(&config).await?;
        }
        Commands::Show => {
            show_registration(&config).await?;
        }
    }

    Ok(())
}

/// `--data-dir`, then the environment, then the home directory
fn resolve_data_dir(cli: Option<PathBuf>, configured: PathBuf) -> PathBuf {
    if let Some(dir) = cli {
        return dir;
    }
    if std::env::var_os(ENV_DEVICE_STORAGE_PATH).is_some() {
        return configured;
    }
    dirs::home_dir()
        .map(|home| home.join(DEVICE_STORAGE_DIR))
        .unwrap_or(configured)
}

async fn register_device(
    config: &DeviceClientConfig,
    thing_name: &str,
    account_token: &str,
    version: &str,
    attributes: &[String],
    force: bool,
) -> Result<()> {
    info!(thing_name = %thing_name, "Registering device");

    let attributes = parse_attributes(attributes).map_err(report_failure)?;
    let mut registrar = DeviceRegistrar::new(config).await?;

    if registrar.is_registered() && !force {
        println!("\nDevice is already registered.");
        println!("Use --force to discard the stored registration and register again.");
        return Ok(());
    }

    let stored = if force {
        registrar
            .re_register(thing_name, account_token, version, attributes)
            .await
            .map_err(report_failure)?
    } else {
        registrar
            .register(thing_name, account_token, version, attributes)
            .await
            .map_err(report_failure)?
    };

    println!("\n✓ Device registered successfully!");
    println!("  Thing: {}", stored.thing_name);
    println!("  Certificate: {}", stored.certificate_arn);
    println!("  Root CA stored: {}", stored.has_root_ca);
    println!("  Files: {}", registrar.storage().path().display());

    Ok(())
}

async fn ping_service(config: &DeviceClientConfig) -> Result<()> {
    let registrar = DeviceRegistrar::new(config).await?;
    let ping = registrar.ping().await.map_err(report_failure)?;

    println!("\n✓ Identity Service reachable at {}", config.register_url());
    println!("  Server time: {}", ping.time);

    Ok(())
}

async fn show_registration(config: &DeviceClientConfig) -> Result<()> {
    let storage = SecureStorage::new(&config.storage).await?;

    if let Some(registration) = storage.load_registration().await? {
        println!("\nDevice Registration:");
        println!("  Thing: {}", registration.thing_name);
        println!("  Certificate: {}", registration.certificate_arn);
        println!("  Registered: {}", registration.registered_at);
        println!("  Root CA stored: {}", registration.has_root_ca);
        println!("  Files: {}", storage.path().display());
    } else {
        println!("\nNo device registration found.");
        println!("Run 'device-client register' to register this device.");
    }

    Ok(())
}
