//! # User Directory
//!
//! Resolves user access tokens to user ids for the authorization path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use shared::error::{IdentityError, IdentityResult};

/// Access token resolver
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// User id behind an access token; `None` if the token is invalid
    async fn resolve_principal_by_access_token(&self, access_token: &str) -> Option<String>;
}

/// Fixed table of access tokens
#[derive(Debug, Default, Clone)]
pub struct StaticUserDirectory {
    tokens: HashMap<String, String>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an access token for a user
    pub fn with_user(mut self, access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(access_token.into(), user_id.into());
        self
    }

    /// Load a JSON object of `access token -> user id`
    pub async fn from_file(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let tokens: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| IdentityError::ConfigurationError(format!("invalid user table: {}", e)))?;
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn resolve_principal_by_access_token(&self, access_token: &str) -> Option<String> {
        let user = self.tokens.get(access_token).cloned();
        if user.is_none() {
            debug!("Access token not recognised");
        }
        user
    }
}
