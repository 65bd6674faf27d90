//! # Configuration for Thing Identity Vending
//!
//! Process-level settings loaded from environment variables. Engine
//! parameters (policies, token rules, CA sources) are not here: they are
//! fetched per request from the configuration provider.

use crate::constants::*;
use crate::error::{IdentityError, IdentityResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

// =============================================================================
// IDENTITY SERVICE CONFIGURATION
// =============================================================================

/// Configuration for the Identity Service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityServiceConfig {
    /// API server configuration
    pub api: ApiConfig,

    /// Path of the engine parameter document in the configuration provider
    pub app_config_path: String,

    /// Local file backing the configuration provider
    pub app_config_file: PathBuf,

    /// Optional JSON table of user access tokens
    pub users_file: Option<PathBuf>,

    /// Local identity directory scope
    pub directory: DirectoryConfig,
}

/// Scope of the local identity directory (appears in certificate ARNs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub region: String,
    pub account_id: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_DIRECTORY_REGION.into(),
            account_id: DEFAULT_DIRECTORY_ACCOUNT.into(),
        }
    }
}

impl Default for IdentityServiceConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            app_config_path: DEFAULT_APP_CONFIG_PATH.into(),
            app_config_file: PathBuf::from(DEFAULT_APP_CONFIG_FILE),
            users_file: None,
            directory: DirectoryConfig::default(),
        }
    }
}

impl IdentityServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> IdentityResult<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var(ENV_SERVICE_HOST) {
            config.api.host = host;
        }

        if let Ok(port) = env::var(ENV_SERVICE_PORT) {
            config.api.port = port.parse().map_err(|_| {
                IdentityError::ConfigurationError(format!("{} is not a valid port: {}", ENV_SERVICE_PORT, port))
            })?;
        }

        if let Ok(path) = env::var(ENV_APP_CONFIG_PATH) {
            config.app_config_path = path;
        }

        if let Ok(file) = env::var(ENV_APP_CONFIG_FILE) {
            config.app_config_file = PathBuf::from(file);
        }

        if let Ok(file) = env::var(ENV_APP_USERS_FILE) {
            config.users_file = Some(PathBuf::from(file));
        }

        if let Ok(flag) = env::var(ENV_ENABLE_CORS) {
            config.api.enable_cors = parse_flag(ENV_ENABLE_CORS, &flag)?;
        }

        if let Ok(region) = env::var(ENV_DIRECTORY_REGION) {
            config.directory.region = region;
        }

        if let Ok(account) = env::var(ENV_DIRECTORY_ACCOUNT) {
            config.directory.account_id = account;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> IdentityResult<()> {
        if self.app_config_path.trim().is_empty() {
            return Err(IdentityError::ConfigurationError(
                "configuration document path must not be empty".into(),
            ));
        }

        if self.api.port == 0 {
            return Err(IdentityError::ConfigurationError("port must be non-zero".into()));
        }

        if self.api.max_body_size == 0 {
            return Err(IdentityError::ConfigurationError("max_body_size must be non-zero".into()));
        }

        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> IdentityResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(IdentityError::ConfigurationError(format!(
            "{} must be a boolean, got '{}'",
            name, value
        ))),
    }
}

// =============================================================================
// API CONFIGURATION
// =============================================================================

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub enable_cors: bool,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: IDENTITY_SERVICE_PORT,
            enable_cors: true,
            max_body_size: MAX_REQUEST_BODY_SIZE,
        }
    }
}

impl ApiConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// DEVICE CLIENT CONFIGURATION
// =============================================================================

/// Storage configuration for device credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the certificate, keys and root CA
    pub data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DEVICE_STORAGE_PATH),
        }
    }
}

/// Configuration for the Device Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceClientConfig {
    /// Identity Service URL (for registration)
    pub identity_service_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Local storage configuration
    pub storage: StorageConfig,
}

impl Default for DeviceClientConfig {
    fn default() -> Self {
        Self {
            identity_service_url: format!("http://localhost:{}", IDENTITY_SERVICE_PORT),
            timeout_secs: DEVICE_CLIENT_TIMEOUT_SECS,
            storage: StorageConfig::default(),
        }
    }
}

impl DeviceClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var(ENV_IDENTITY_SERVICE_URL) {
            config.identity_service_url = url;
        }

        if let Ok(path) = env::var(ENV_DEVICE_STORAGE_PATH) {
            config.storage.data_path = PathBuf::from(path);
        }

        config
    }

    /// Registration endpoint URL
    pub fn register_url(&self) -> String {
        format!("{}{}", self.identity_service_url.trim_end_matches('/'), REGISTER_PATH)
    }
}
