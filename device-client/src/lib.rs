//! # Device Client for Thing Identity Vending
//!
//! This crate provides client-side functionality for IoT agents:
//! - Registration with the Identity Service
//! - Secure local storage of the issued certificate and keys

pub mod registration;
pub mod storage;

// Re-export commonly used types
pub use registration::DeviceRegistrar;
pub use storage::{SecureStorage, StoredRegistration};
