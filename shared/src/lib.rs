//! # Shared Module for Thing Identity Vending
//!
//! This crate provides common types, errors, and configuration used across
//! the Identity Service and Device Client components.
//!
//! ## Architecture
//!
//! Devices obtain an X.509 identity from the Identity Service:
//! - **Registration** provisions a certificate, binds it to a thing record
//!   and returns the key material exactly once
//! - **Authorization** turns a bearer token into a scoped permission document
//!   for the API gateway
//!
//! | Concern | Where it lives |
//! |---------|----------------|
//! | Wire types | [`types`] |
//! | Error taxonomy | [`error`] |
//! | Service / client settings | [`config`] |

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::*;
pub use constants::*;
pub use error::*;
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
