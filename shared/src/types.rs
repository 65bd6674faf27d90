//! # Shared Data Types for Thing Identity Vending
//!
//! Wire types exchanged between the gateway, the Identity Service and the
//! device client. Field names follow the JSON boundary (camelCase for the
//! registration API, PascalCase inside permission documents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{EXECUTE_API_ACTION, POLICY_VERSION};

/// Opaque condition block attached to a statement
pub type Conditions = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// REGISTRATION
// =============================================================================

/// Request to register a new device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationRequest {
    /// Candidate unique thing name
    pub thing_name: String,

    /// Account token presented by the agent
    pub account_token: String,

    /// Agent version, copied into the thing attributes
    pub version: String,

    /// Caller-supplied attributes (filtered by the thing type allow-list)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// A thing record as held by the identity directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationRecord {
    /// Thing name
    pub thing_name: String,

    /// Thing type selected at registration
    pub thing_type_name: String,

    /// Attributes written at creation
    pub thing_attributes: BTreeMap<String, String>,

    /// When the record was created
    pub creation_date: DateTime<Utc>,
}

/// Key pair returned alongside a certificate
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    /// PEM encoded public key
    pub public_key: String,

    /// PEM encoded private key, handed to the caller once
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Certificate material created by a successful registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateBundle {
    /// PEM encoded X.509 certificate
    pub pem: String,

    /// Certificate key pair
    pub key_pair: KeyPair,

    /// Opaque directory handle of the certificate
    pub certificate_arn: String,
}

/// Root CA material returned with a registration
///
/// Distribution of the root CA is best effort: when no source answered the
/// chain is `Absent`, which is `false` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrustChain {
    /// The fetched CA document
    Present(String),
    /// No source returned the document
    #[default]
    Absent,
}

impl TrustChain {
    /// Whether a CA document was obtained
    pub fn is_present(&self) -> bool {
        matches!(self, TrustChain::Present(_))
    }

    /// The CA document, if any
    pub fn as_pem(&self) -> Option<&str> {
        match self {
            TrustChain::Present(pem) => Some(pem),
            TrustChain::Absent => None,
        }
    }
}

impl Serialize for TrustChain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TrustChain::Present(pem) => serializer.serialize_str(pem),
            TrustChain::Absent => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for TrustChain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Pem(String),
            Flag(bool),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Pem(pem) => Ok(TrustChain::Present(pem)),
            Wire::Flag(_) => Ok(TrustChain::Absent),
        }
    }
}

/// Successful registration payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationResponse {
    /// Certificate and keys
    pub certificate_data: CertificateBundle,

    /// Root CA, or `false` when unavailable
    pub root_ca: TrustChain,
}

/// Failure payload of the registration API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Always `false`
    pub status: bool,

    /// Caller-facing message
    pub error: String,
}

impl ErrorResponse {
    /// Build a failure payload
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: false,
            error: error.into(),
        }
    }
}

/// Liveness payload of `GET /register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    /// Always `true`
    pub response: bool,

    /// Server time, seconds since epoch
    pub time: i64,
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Token authorizer event sent by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    /// Bearer token, `<prefix> <value>`
    pub authorization_token: String,

    /// ARN of the invoked method
    pub method_arn: String,

    /// Authorizer type (e.g. "TOKEN")
    #[serde(rename = "type")]
    pub request_type: String,
}

/// Kind of authenticated caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    /// An IoT agent
    Device,
    /// A human operator
    User,
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalType::Device => write!(f, "DEVICE"),
            PrincipalType::User => write!(f, "USER"),
        }
    }
}

/// The authenticated identity behind a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub principal_type: PrincipalType,
}

/// Statement effect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "Allow"),
            Effect::Deny => write!(f, "Deny"),
        }
    }
}

/// One statement of a permission document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub effect: Effect,
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Conditions>,
}

impl Statement {
    /// An empty statement for the given effect
    pub fn empty(effect: Effect) -> Self {
        Self {
            action: EXECUTE_API_ACTION.to_string(),
            effect,
            resource: Vec::new(),
            condition: None,
        }
    }
}

/// The `policyDocument` member of a permission document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

/// Authorizer response consumed by the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDocument {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
}

impl PermissionDocument {
    /// Create a document from ordered statements
    pub fn new(principal_id: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            principal_id: principal_id.into(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: statements,
            },
        }
    }

    /// Policy language version
    pub fn version(&self) -> &str {
        &self.policy_document.version
    }

    /// Ordered statements
    pub fn statements(&self) -> &[Statement] {
        &self.policy_document.statement
    }

    /// Whether every statement denies
    pub fn is_all_deny(&self) -> bool {
        !self.statements().is_empty() && self.statements().iter().all(|s| s.effect == Effect::Deny)
    }

    /// Whether any statement allows
    pub fn allows_anything(&self) -> bool {
        self.statements().iter().any(|s| s.effect == Effect::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_names() {
        let request: DeviceRegistrationRequest = serde_json::from_str(
            r#"{"thingName":"Sensor01","accountToken":"acc-1","version":"1"}"#,
        )
        .unwrap();
        assert_eq!(request.thing_name, "Sensor01");
        assert!(request.attributes.is_empty());
    }

    #[test]
    fn test_trust_chain_wire_format() {
        let absent = serde_json::to_value(TrustChain::Absent).unwrap();
        assert_eq!(absent, serde_json::Value::Bool(false));

        let present = serde_json::to_value(TrustChain::Present("-----BEGIN".into())).unwrap();
        assert_eq!(present, serde_json::Value::String("-----BEGIN".into()));

        let parsed: TrustChain = serde_json::from_str("false").unwrap();
        assert_eq!(parsed, TrustChain::Absent);
    }

    #[test]
    fn test_key_pair_debug_redacts_private_key() {
        let pair = KeyPair {
            public_key: "PUBLIC".into(),
            private_key: "SECRET".into(),
        };
        let debug = format!("{:?}", pair);
        assert!(debug.contains("PUBLIC"));
        assert!(!debug.contains("SECRET"));
    }

    #[test]
    fn test_permission_document_shape() {
        let mut statement = Statement::empty(Effect::Deny);
        statement.resource.push("arn:aws:execute-api:*:*:*/*/*/*".into());
        let document = PermissionDocument::new("unknown", vec![statement]);

        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["principalId"], "unknown");
        assert_eq!(json["policyDocument"]["Version"], "2012-10-17");
        assert_eq!(json["policyDocument"]["Statement"][0]["Effect"], "Deny");
        assert_eq!(json["policyDocument"]["Statement"][0]["Action"], "execute-api:Invoke");
        assert!(json["policyDocument"]["Statement"][0].get("Condition").is_none());
        assert!(document.is_all_deny());
    }
}
