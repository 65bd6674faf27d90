//! # Thing Identity Vending Service
//!
//! This service provides:
//! - Device registration: certificate provisioning bound to a thing record
//! - Bearer token authorization for the API gateway
//!
//! ## Collaborators
//!
//! The engine never talks to a backend directly. Configuration, the identity
//! directory, the user directory and the CA trust source are traits injected
//! through [`context::Collaborators`]; local implementations ship with each
//! module so the service runs standalone.

pub mod api;
pub mod authorizer;
pub mod configuration;
pub mod context;
pub mod directory;
pub mod policy;
pub mod registration;
pub mod response;
pub mod trust;
pub mod users;

use shared::config::IdentityServiceConfig;

use authorizer::TokenAuthorizer;
use context::Collaborators;
use registration::RegistrationEngine;

/// Application state shared across handlers
pub struct AppState {
    /// Configuration
    pub config: IdentityServiceConfig,
    /// External collaborators
    pub collaborators: Collaborators,
    /// Registration state machine
    pub engine: RegistrationEngine,
    /// Token authorizer
    pub authorizer: TokenAuthorizer,
}

impl AppState {
    /// State with the default validator and grants
    pub fn new(config: IdentityServiceConfig, collaborators: Collaborators) -> Self {
        let authorizer = TokenAuthorizer::with_default_grants(collaborators.users.clone());
        Self {
            config,
            collaborators,
            engine: RegistrationEngine::default(),
            authorizer,
        }
    }
}
