//! # Secure Storage for Device Client
//!
//! Keeps the material returned by a successful registration:
//! - `certificate.pem` and `public_key.pem`
//! - `private_key.pem`, owner read/write only on Unix
//! - `root_ca.pem`, when the service could fetch one
//! - `registration.json`, a summary of the registration
//!
//! The private key is delivered exactly once, so this is its only copy.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use shared::{
    config::StorageConfig,
    error::{IdentityError, IdentityResult},
    types::DeviceRegistrationResponse,
};

const CERTIFICATE_FILE: &str = "certificate.pem";
const PUBLIC_KEY_FILE: &str = "public_key.pem";
const PRIVATE_KEY_FILE: &str = "private_key.pem";
const ROOT_CA_FILE: &str = "root_ca.pem";
const REGISTRATION_FILE: &str = "registration.json";

/// Summary written next to the credential files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredRegistration {
    pub thing_name: String,
    pub certificate_arn: String,
    pub registered_at: DateTime<Utc>,
    pub has_root_ca: bool,
}

/// File storage for device credentials
pub struct SecureStorage {
    /// Path to storage directory
    storage_path: PathBuf,

    /// Cached registration summary
    registration: Option<StoredRegistration>,
}

impl SecureStorage {
    /// Create a new SecureStorage instance
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        info!(path = ?config.data_path, "Initializing secure storage");

        // Ensure directories exist
        tokio::fs::create_dir_all(&config.data_path).await?;

        let mut storage = Self {
            storage_path: config.data_path.clone(),
            registration: None,
        };

        // Try to load existing data
        storage.registration = storage.load_registration().await.ok().flatten();

        Ok(storage)
    }

    /// Directory holding the files
    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    /// Persist everything a registration returned
    pub async fn store_registration(
        &mut self,
        thing_name: &str,
        response: &DeviceRegistrationResponse,
    ) -> IdentityResult<StoredRegistration> {
        let bundle = &response.certificate_data;

        self.write(CERTIFICATE_FILE, &bundle.pem).await?;
        self.write(PUBLIC_KEY_FILE, &bundle.key_pair.public_key).await?;
        self.store_private_key(&bundle.key_pair.private_key).await?;

        let has_root_ca = match response.root_ca.as_pem() {
            Some(pem) => {
                self.write(ROOT_CA_FILE, pem).await?;
                true
            }
            None => false,
        };

        let registration = StoredRegistration {
            thing_name: thing_name.to_string(),
            certificate_arn: bundle.certificate_arn.clone(),
            registered_at: Utc::now(),
            has_root_ca,
        };
        let json = serde_json::to_string_pretty(&registration)?;
        self.write(REGISTRATION_FILE, &json).await?;

        self.registration = Some(registration.clone());
        info!(thing_name = %thing_name, path = ?self.storage_path, "Registration stored");
        Ok(registration)
    }

    /// Load the registration summary
    pub async fn load_registration(&self) -> IdentityResult<Option<StoredRegistration>> {
        if let Some(ref registration) = self.registration {
            return Ok(Some(registration.clone()));
        }

        match self.read(REGISTRATION_FILE).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Load the certificate PEM
    pub async fn load_certificate(&self) -> IdentityResult<Option<String>> {
        self.read(CERTIFICATE_FILE).await
    }

    /// Load the private key PEM
    pub async fn load_private_key(&self) -> IdentityResult<Option<String>> {
        self.read(PRIVATE_KEY_FILE).await
    }

    /// Load the root CA PEM
    pub async fn load_root_ca(&self) -> IdentityResult<Option<String>> {
        self.read(ROOT_CA_FILE).await
    }

    /// Check if device is registered
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Registered thing name
    pub fn thing_name(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.thing_name.as_str())
    }

    /// Clear all stored data
    pub async fn clear(&mut self) -> IdentityResult<()> {
        let files = [
            CERTIFICATE_FILE,
            PUBLIC_KEY_FILE,
            PRIVATE_KEY_FILE,
            ROOT_CA_FILE,
            REGISTRATION_FILE,
        ];

        for file in files {
            let path = self.storage_path.join(file);
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }

        self.registration = None;

        info!("Storage cleared");
        Ok(())
    }

    async fn store_private_key(&self, pem: &str) -> IdentityResult<()> {
        let path = self.storage_path.join(PRIVATE_KEY_FILE);

        // Owner-only read/write from creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            use tokio::io::AsyncWriteExt;

            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)
                .await?;

            // mode only applies to new files; a leftover key keeps its bits
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
            file.write_all(pem.as_bytes()).await?;
            file.flush().await?;
        }

        #[cfg(not(unix))]
        tokio::fs::write(&path, pem).await?;

        debug!(path = ?path, "Private key stored");
        Ok(())
    }

    async fn write(&self, file: &str, contents: &str) -> IdentityResult<()> {
        let path = self.storage_path.join(file);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| IdentityError::StorageIOError(format!("{}: {}", path.display(), e)))?;
        debug!(path = ?path, "File stored");
        Ok(())
    }

    async fn read(&self, file: &str) -> IdentityResult<Option<String>> {
        let path = self.storage_path.join(file);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(&path).await?))
    }
}
