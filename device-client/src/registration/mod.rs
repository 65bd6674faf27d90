//! # Device Registration
//!
//! Handles device registration with the Identity Service:
//! 1. Send thing name, account token and version to `POST /register`
//! 2. Receive the certificate, key pair and root CA
//! 3. Store them locally in secure storage

use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use shared::{
    config::DeviceClientConfig,
    error::{IdentityError, IdentityResult},
    types::{DeviceRegistrationRequest, DeviceRegistrationResponse, ErrorResponse, PingResponse},
};

use crate::storage::{SecureStorage, StoredRegistration};

/// Device Registrar for registering with Identity Service
pub struct DeviceRegistrar {
    /// Registration endpoint
    register_url: String,

    /// HTTP client
    http_client: reqwest::Client,

    /// Secure storage for credentials
    storage: SecureStorage,
}

impl DeviceRegistrar {
    /// Create a new DeviceRegistrar
    pub async fn new(config: &DeviceClientConfig) -> Result<Self> {
        let storage = SecureStorage::new(&config.storage).await?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            register_url: config.register_url(),
            http_client,
            storage,
        })
    }

    /// Register this device with the Identity Service
    pub async fn register(
        &mut self,
        thing_name: &str,
        account_token: &str,
        version: &str,
        attributes: BTreeMap<String, String>,
    ) -> IdentityResult<StoredRegistration> {
        if let Some(existing) = self.storage.thing_name() {
            return Err(IdentityError::RegistrationError(format!(
                "device is already registered as '{}'",
                existing
            )));
        }

        info!(thing_name = %thing_name, url = %self.register_url, "Starting device registration");

        let request = DeviceRegistrationRequest {
            thing_name: thing_name.to_string(),
            account_token: account_token.to_string(),
            version: version.to_string(),
            attributes,
        };

        let response = self
            .http_client
            .post(&self.register_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IdentityError::NetworkConnectionError {
                endpoint: self.register_url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(IdentityError::RegistrationError(format!(
                "Registration failed with {}: {}",
                status, message
            )));
        }

        let registration: DeviceRegistrationResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::SerializationError(e.to_string()))?;

        if !registration.root_ca.is_present() {
            warn!("Service returned no root CA; fetch it separately before connecting");
        }

        debug!(certificate = %registration.certificate_data.certificate_arn, "Certificate received");

        self.storage.store_registration(thing_name, &registration).await
    }

    /// Liveness check of the registration endpoint
    pub async fn ping(&self) -> IdentityResult<PingResponse> {
        let response = self
            .http_client
            .get(&self.register_url)
            .send()
            .await
            .map_err(|e| IdentityError::NetworkConnectionError {
                endpoint: self.register_url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(IdentityError::NetworkConnectionError {
                endpoint: self.register_url.clone(),
                reason: format!("status {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| IdentityError::SerializationError(e.to_string()))
    }

    /// Check if device is already registered
    pub fn is_registered(&self) -> bool {
        self.storage.is_registered()
    }

    /// Local credential storage
    pub fn storage(&self) -> &SecureStorage {
        &self.storage
    }

    /// Drop the local registration and register again under a new name
    pub async fn re_register(
        &mut self,
        thing_name: &str,
        account_token: &str,
        version: &str,
        attributes: BTreeMap<String, String>,
    ) -> IdentityResult<StoredRegistration> {
        self.storage.clear().await?;
        self.register(thing_name, account_token, version, attributes).await
    }
}

/// Log a failed operation with its category and hand the error back
pub fn report_failure(err: IdentityError) -> IdentityError {
    error!(
        category = err.category(),
        retryable = err.is_retryable(),
        error = %err,
        "Device operation failed"
    );
    err
}

/// Parse `key=value` pairs given on the command line
pub fn parse_attributes(pairs: &[String]) -> IdentityResult<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(IdentityError::InvalidRequest(format!(
                "attribute '{}' must be key=value",
                pair
            ))),
        })
        .collect()
}
