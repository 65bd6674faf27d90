//! # Error Types for Thing Identity Vending
//!
//! This module defines all error types used throughout the system.
//! Directory outcomes are tagged kinds rather than opaque failures, so the
//! registration engine can tell "not found" from "unavailable" by matching.

use std::fmt;
use thiserror::Error;

// =============================================================================
// GENERIC ERRORS
// =============================================================================

/// Main error type for configuration, transport and storage concerns
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Invalid request format
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Registration rejected or failed remotely
    #[error("Device registration failed: {0}")]
    RegistrationError(String),

    /// Failed to reach a remote endpoint
    #[error("Failed to connect to '{endpoint}': {reason}")]
    NetworkConnectionError { endpoint: String, reason: String },

    /// Failed to read/write file
    #[error("Storage I/O error: {0}")]
    StorageIOError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias using IdentityError
pub type IdentityResult<T> = Result<T, IdentityError>;

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        IdentityError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for IdentityError {
    fn from(err: std::io::Error) -> Self {
        IdentityError::StorageIOError(err.to_string())
    }
}

impl IdentityError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            IdentityError::ConfigurationError(_) => "config",

            IdentityError::InvalidRequest(_) | IdentityError::RegistrationError(_) => "api",

            IdentityError::NetworkConnectionError { .. } => "network",

            IdentityError::StorageIOError(_) => "storage",

            IdentityError::SerializationError(_) => "internal",
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentityError::NetworkConnectionError { .. })
    }
}

// =============================================================================
// IDENTITY DIRECTORY ERRORS
// =============================================================================

/// Outcome kinds reported by an identity directory operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The named entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entity already exists (uniqueness enforced by the directory)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The directory could not be reached or answered unexpectedly
    #[error("Directory transport error: {0}")]
    Transport(String),
}

impl DirectoryError {
    /// Whether this is the "does not exist" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound(_))
    }
}

// =============================================================================
// REGISTRATION ERRORS
// =============================================================================

/// Step of the provisioning sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    /// Certificate and key pair creation
    CreateCertificate,
    /// Attaching the directory policy to the certificate
    AttachPolicy,
    /// Creating the thing record
    CreateRecord,
    /// Binding the certificate as the thing's principal
    BindPrincipal,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningStage::CreateCertificate => write!(f, "create_certificate"),
            ProvisioningStage::AttachPolicy => write!(f, "attach_policy"),
            ProvisioningStage::CreateRecord => write!(f, "create_record"),
            ProvisioningStage::BindPrincipal => write!(f, "bind_principal"),
        }
    }
}

/// Terminal failures of a registration attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Malformed caller input; no directory call was made
    #[error("Invalid registration request: {0}")]
    Validation(String),

    /// A thing with this name already exists
    #[error("Thing '{thing_name}' is already registered")]
    AlreadyRegistered { thing_name: String },

    /// Directory or configuration source unreachable
    #[error("Identity directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Provisioning failed; a certificate may be left orphaned
    #[error("Provisioning failed at {stage}: {reason}")]
    ProvisioningFailed {
        stage: ProvisioningStage,
        orphaned_certificate: Option<String>,
        reason: String,
    },

    /// Engine parameters cannot serve this registration (operator action needed)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RegistrationError {
    /// Short kind label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            RegistrationError::Validation(_) => "validation",
            RegistrationError::AlreadyRegistered { .. } => "already_registered",
            RegistrationError::DirectoryUnavailable(_) => "directory_unavailable",
            RegistrationError::ProvisioningFailed { .. } => "provisioning_failed",
            RegistrationError::Configuration(_) => "configuration",
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RegistrationError::Validation(_) | RegistrationError::AlreadyRegistered { .. }
        )
    }
}

// =============================================================================
// PERMISSION POLICY ERRORS
// =============================================================================

/// Failures building a permission document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Neither allow nor deny entries were given
    #[error("No statements defined for the policy")]
    EmptyPolicy,

    /// Resource path contains characters outside the allowed set
    #[error("Invalid resource path: {path}. Path should match {pattern}")]
    InvalidResourcePath { path: String, pattern: &'static str },

    /// HTTP verb is not one the gateway understands
    #[error("Invalid HTTP verb: {0}")]
    InvalidVerb(String),
}

// =============================================================================
// TRUST CHAIN ERRORS
// =============================================================================

/// Failures fetching a CA trust document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustFetchError {
    /// Request could not be completed
    #[error("Request to '{url}' failed: {reason}")]
    Request { url: String, reason: String },

    /// Source answered with a non-success status
    #[error("'{url}' answered with status {status}")]
    Status { url: String, status: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = IdentityError::ConfigurationError("SERVICE_PORT is not a valid port".into());
        assert_eq!(err.category(), "config");

        let err = IdentityError::StorageIOError("disk full".into());
        assert_eq!(err.category(), "storage");
    }

    #[test]
    fn test_is_retryable() {
        let err = IdentityError::NetworkConnectionError {
            endpoint: "http://localhost:8080".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_retryable());

        let err = IdentityError::InvalidRequest("missing thingName".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_registration_error_kinds() {
        let err = RegistrationError::AlreadyRegistered {
            thing_name: "Sensor01".into(),
        };
        assert_eq!(err.kind(), "already_registered");
        assert!(err.is_client_error());

        let err = RegistrationError::ProvisioningFailed {
            stage: ProvisioningStage::BindPrincipal,
            orphaned_certificate: Some("arn:aws:iot:local:000000000000:cert/abc".into()),
            reason: "timeout".into(),
        };
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("bind_principal"));
    }

    #[test]
    fn test_directory_not_found() {
        assert!(DirectoryError::NotFound("Sensor01".into()).is_not_found());
        assert!(!DirectoryError::Transport("reset".into()).is_not_found());
    }
}
