//! # Configuration Provider
//!
//! Engine parameters are fetched from the configuration provider on every
//! request and never cached by the engine. A provider returns `None` when the
//! document cannot be obtained; callers decide what that means (registration
//! fails as directory-unavailable, authorization denies).

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, error, warn};

use shared::constants::*;

/// Source of engine parameter documents
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    /// Fetch the current parameter document stored under `path`
    async fn get_config(&self, path: &str) -> Option<serde_json::Value>;
}

// =============================================================================
// ENGINE PARAMETERS
// =============================================================================

/// Root CA download sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RootCaSources {
    pub preferred: String,
    pub backup: String,
}

impl Default for RootCaSources {
    fn default() -> Self {
        Self {
            preferred: DEFAULT_ROOT_CA_PREFERRED.into(),
            backup: DEFAULT_ROOT_CA_BACKUP.into(),
        }
    }
}

/// Bearer token shape rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRules {
    #[serde(default = "default_token_payload_length")]
    pub token_payload_length: usize,
    #[serde(default = "default_token_identifier_device")]
    pub token_identifier_device: String,
    #[serde(default = "default_token_identifier_user")]
    pub token_identifier_user: String,
}

impl Default for TokenRules {
    fn default() -> Self {
        Self {
            token_payload_length: default_token_payload_length(),
            token_identifier_device: default_token_identifier_device(),
            token_identifier_user: default_token_identifier_user(),
        }
    }
}

fn default_token_payload_length() -> usize {
    DEFAULT_TOKEN_PAYLOAD_LENGTH
}

fn default_token_identifier_device() -> String {
    DEFAULT_TOKEN_IDENTIFIER_DEVICE.into()
}

fn default_token_identifier_user() -> String {
    DEFAULT_TOKEN_IDENTIFIER_USER.into()
}

fn default_thing_type_name_rule() -> String {
    DEFAULT_THING_TYPE_NAME_RULE.into()
}

/// Reference to a pre-existing directory policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyReference {
    pub name: String,
}

/// One allow-listed attribute of a thing type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub name: String,
}

/// Typed form of the engine parameter document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct EngineParameters {
    /// Root CA sources
    #[serde(default)]
    pub aws_root_ca: RootCaSources,

    /// Case-insensitive substring selecting the thing type
    #[serde(default = "default_thing_type_name_rule")]
    pub thing_type_name_rule: String,

    /// Policy per thing type
    #[serde(default)]
    pub policies: HashMap<String, PolicyReference>,

    /// Policy used when the thing type has no entry in `policies`
    #[serde(default)]
    pub default_policy: Option<String>,

    /// Attribute allow-list per thing type
    #[serde(default)]
    pub attributes: HashMap<String, Vec<AttributeDefinition>>,

    /// Token shape rules; absent means every token is denied
    #[serde(default)]
    pub authorizer: Option<TokenRules>,

    /// When non-empty, device token values must be listed here
    #[serde(default)]
    pub device_valid_tokens: Vec<String>,
}

impl EngineParameters {
    /// Parse a raw parameter document
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Policy name for a thing type, falling back to the default policy
    pub fn policy_for(&self, thing_type: &str) -> Option<&str> {
        self.policies
            .get(thing_type)
            .map(|p| p.name.as_str())
            .or(self.default_policy.as_deref())
    }

    /// Attribute names a thing type may carry; `None` if the type is not configured
    pub fn allowed_attributes(&self, thing_type: &str) -> Option<BTreeSet<&str>> {
        self.attributes
            .get(thing_type)
            .map(|defs| defs.iter().map(|d| d.name.as_str()).collect())
    }

    /// Every thing type and policy name mentioned by the document
    pub fn declared_names(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let thing_types = self
            .policies
            .keys()
            .chain(self.attributes.keys())
            .cloned()
            .collect();

        let policies = self
            .policies
            .values()
            .map(|p| p.name.clone())
            .chain(self.default_policy.clone())
            .collect();

        (thing_types, policies)
    }
}

/// Fetch and parse the parameter document; `None` when unavailable or malformed
pub async fn load_parameters(provider: &dyn ConfigurationProvider, path: &str) -> Option<EngineParameters> {
    let raw = match provider.get_config(path).await {
        Some(raw) => raw,
        None => {
            warn!(path = %path, "Configuration document unavailable");
            return None;
        }
    };

    match EngineParameters::from_value(raw) {
        Ok(parameters) => {
            debug!(path = %path, "Configuration document loaded");
            Some(parameters)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Configuration document is malformed");
            None
        }
    }
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// Provider backed by a JSON file mapping document paths to documents
///
/// The file is re-read on every call so edits apply to the next request.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the whole file
    pub async fn read_all(&self) -> Option<serde_json::Value> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(file = ?self.path, error = %e, "Failed to read configuration file");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(file = ?self.path, error = %e, "Configuration file is not valid JSON");
                None
            }
        }
    }
}

#[async_trait]
impl ConfigurationProvider for FileConfigProvider {
    async fn get_config(&self, path: &str) -> Option<serde_json::Value> {
        let all = self.read_all().await?;
        all.get(path).cloned()
    }
}

/// In-memory provider, replaceable at runtime
#[derive(Default)]
pub struct StaticConfigProvider {
    documents: RwLock<HashMap<String, serde_json::Value>>,
}

impl StaticConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider holding a single document
    pub fn with_document(path: impl Into<String>, document: serde_json::Value) -> Self {
        let provider = Self::new();
        provider.set(path, document);
        provider
    }

    /// Insert or replace a document
    pub fn set(&self, path: impl Into<String>, document: serde_json::Value) {
        self.documents.write().insert(path.into(), document);
    }
}

#[async_trait]
impl ConfigurationProvider for StaticConfigProvider {
    async fn get_config(&self, path: &str) -> Option<serde_json::Value> {
        self.documents.read().get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> serde_json::Value {
        json!({
            "AWS_ROOT_CA": {
                "PREFERRED": "https://ca.example/root.pem",
                "BACKUP": "https://backup.example/root.pem"
            },
            "THING_TYPE_NAME_RULE": "Cvm",
            "POLICIES": { "CvmSensor": { "name": "sensorPolicy" } },
            "DEFAULT_POLICY": "fallbackPolicy",
            "ATTRIBUTES": {
                "CvmSensor": [{ "name": "creationDate" }, { "name": "version" }]
            },
            "AUTHORIZER": {
                "TOKEN_PAYLOAD_LENGTH": 2,
                "TOKEN_IDENTIFIER_DEVICE": "DeviceToken",
                "TOKEN_IDENTIFIER_USER": "JWT"
            }
        })
    }

    #[test]
    fn test_parse_parameters() {
        let params = EngineParameters::from_value(sample_document()).unwrap();
        assert_eq!(params.aws_root_ca.preferred, "https://ca.example/root.pem");
        assert_eq!(params.thing_type_name_rule, "Cvm");
        assert_eq!(params.authorizer.unwrap().token_identifier_device, "DeviceToken");
        assert!(params.device_valid_tokens.is_empty());
    }

    #[test]
    fn test_policy_resolution_falls_back_to_default() {
        let params = EngineParameters::from_value(sample_document()).unwrap();
        assert_eq!(params.policy_for("CvmSensor"), Some("sensorPolicy"));
        assert_eq!(params.policy_for("CvmGateway"), Some("fallbackPolicy"));

        let no_default = EngineParameters {
            default_policy: None,
            ..params
        };
        assert_eq!(no_default.policy_for("CvmGateway"), None);
    }

    #[test]
    fn test_allowed_attributes() {
        let params = EngineParameters::from_value(sample_document()).unwrap();
        let allowed = params.allowed_attributes("CvmSensor").unwrap();
        assert!(allowed.contains("creationDate"));
        assert!(allowed.contains("version"));
        assert!(params.allowed_attributes("Unknown").is_none());
    }

    #[test]
    fn test_missing_authorizer_section_is_none() {
        let params = EngineParameters::from_value(json!({})).unwrap();
        assert!(params.authorizer.is_none());
        assert_eq!(params.thing_type_name_rule, DEFAULT_THING_TYPE_NAME_RULE);
        assert_eq!(params.aws_root_ca, RootCaSources::default());
    }

    #[tokio::test]
    async fn test_load_parameters_handles_absent_and_malformed() {
        let provider = StaticConfigProvider::new();
        assert!(load_parameters(&provider, "/app/config").await.is_none());

        provider.set("/app/config", json!({ "POLICIES": "not-a-map" }));
        assert!(load_parameters(&provider, "/app/config").await.is_none());

        provider.set("/app/config", sample_document());
        assert!(load_parameters(&provider, "/app/config").await.is_some());
    }

    #[tokio::test]
    async fn test_file_provider_reads_document_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("parameters.json");
        let contents = json!({ "/app/config": sample_document() });
        std::fs::write(&file, contents.to_string()).unwrap();

        let provider = FileConfigProvider::new(&file);
        assert!(provider.get_config("/app/config").await.is_some());
        assert!(provider.get_config("/other").await.is_none());
    }

    #[tokio::test]
    async fn test_file_provider_missing_file() {
        let provider = FileConfigProvider::new("/nonexistent/parameters.json");
        assert!(provider.get_config("/app/config").await.is_none());
    }
}
