//! # Thing Identity Vending Service
//!
//! Certificate vending and bearer token authorization for IoT agents.
//!
//! ## Running
//!
//! ```bash
//! export APP_CONFIG_FILE=./config/parameters.json
//! export APP_CONFIG_PATH=/thing-vending/dev/config-parameters
//! export APP_USERS_FILE=./config/users.json   # optional
//! export LOG_LEVEL=debug                      # optional
//!
//! cargo run --release -p identity-service
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /register` - Liveness ping
//! - `POST /register` - Register a new device
//! - `POST /authorize` - Bearer token authorizer

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use identity_service::{
    api,
    configuration::{load_parameters, FileConfigProvider},
    context::Collaborators,
    directory::InMemoryDirectory,
    trust::HttpTrustSource,
    users::StaticUserDirectory,
    AppState,
};
use shared::{config::IdentityServiceConfig, constants::ENV_LOG_LEVEL};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL).unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Thing Identity Vending Service");
    info!("Version: {}", shared::VERSION);

    // Load configuration
    let config = IdentityServiceConfig::from_env()?;
    config.validate()?;

    info!(
        config_file = ?config.app_config_file,
        config_path = %config.app_config_path,
        "Configuration loaded"
    );

    let provider = Arc::new(FileConfigProvider::new(config.app_config_file.clone()));

    // Seed the local directory with the thing types and policies the parameters name
    let directory = match load_parameters(provider.as_ref(), &config.app_config_path).await {
        Some(parameters) => {
            InMemoryDirectory::seeded_from(&config.directory.region, &config.directory.account_id, &parameters)
        }
        None => {
            warn!("Engine parameters unavailable at startup, directory starts empty");
            InMemoryDirectory::new(&config.directory.region, &config.directory.account_id)
        }
    };

    let users = match &config.users_file {
        Some(path) => {
            let users = StaticUserDirectory::from_file(path).await?;
            info!(users = users.len(), "User directory loaded");
            users
        }
        None => {
            info!("No user table configured, user tokens will be denied");
            StaticUserDirectory::new()
        }
    };

    let collaborators = Collaborators {
        config: provider,
        directory: Arc::new(directory),
        users: Arc::new(users),
        trust: Arc::new(HttpTrustSource::default()),
    };

    // Create application state
    let state = Arc::new(AppState::new(config.clone(), collaborators));

    // Create router with shared state
    let app = api::create_router(state);

    // Start server
    let bind_addr = config.api.bind_addr();
    info!(address = %bind_addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
