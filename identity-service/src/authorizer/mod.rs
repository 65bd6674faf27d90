//! # Token Authorizer
//!
//! Turns a bearer token into a permission document for the API gateway.
//!
//! Tokens have the form `<prefix> <value>`. The prefix selects the principal
//! class (device or user), the value identifies the caller. Anything that can
//! not be resolved to a principal gets the all-deny document, so evaluation
//! itself never fails.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use shared::{
    constants::UNKNOWN_PRINCIPAL,
    error::PolicyError,
    types::{PermissionDocument, Principal, PrincipalType},
};

use crate::configuration::{EngineParameters, TokenRules};
use crate::policy::{self, ApiScope, HttpVerb, PolicyEntry};
use crate::users::UserDirectory;

// =============================================================================
// GRANTS
// =============================================================================

/// Capabilities granted to each principal class
pub trait GrantPolicy: Send + Sync {
    /// Allowed entries for a principal
    fn allow_entries(&self, principal: &Principal) -> Vec<PolicyEntry>;

    /// Denied entries for a principal
    fn deny_entries(&self, _principal: &Principal) -> Vec<PolicyEntry> {
        Vec::new()
    }
}

/// Devices may only register; users manage agents and keys
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultGrants;

impl GrantPolicy for DefaultGrants {
    fn allow_entries(&self, principal: &Principal) -> Vec<PolicyEntry> {
        match principal.principal_type {
            PrincipalType::Device => vec![PolicyEntry::new(HttpVerb::Post, "/register")],
            PrincipalType::User => vec![
                PolicyEntry::new(HttpVerb::All, "/agents/*"),
                PolicyEntry::new(HttpVerb::All, "/keys/*"),
            ],
        }
    }
}

// =============================================================================
// TOKEN PARSING
// =============================================================================

/// A token split into its prefix and value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenShape<'a> {
    pub prefix: &'a str,
    pub value: &'a str,
    pub principal_type: PrincipalType,
}

/// Why a token could not be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Wrong number of whitespace separated parts
    Malformed,
    /// Prefix is neither the device nor the user identifier
    UnknownPrefix,
}

/// Split and classify a bearer token
///
/// Parts are separated by runs of whitespace; leading and trailing
/// whitespace is ignored.
pub fn parse_token<'a>(token: &'a str, rules: &TokenRules) -> Result<TokenShape<'a>, TokenRejection> {
    let parts: Vec<&str> = token.split_whitespace().collect();
    if parts.len() != rules.token_payload_length || parts.len() < 2 {
        return Err(TokenRejection::Malformed);
    }

    let prefix = parts[0];
    let value = parts[parts.len() - 1];

    let principal_type = if prefix == rules.token_identifier_device {
        PrincipalType::Device
    } else if prefix == rules.token_identifier_user {
        PrincipalType::User
    } else {
        return Err(TokenRejection::UnknownPrefix);
    };

    Ok(TokenShape {
        prefix,
        value,
        principal_type,
    })
}

// =============================================================================
// AUTHORIZER
// =============================================================================

/// Bearer token evaluator
pub struct TokenAuthorizer {
    users: Arc<dyn UserDirectory>,
    grants: Arc<dyn GrantPolicy>,
}

impl TokenAuthorizer {
    pub fn new(users: Arc<dyn UserDirectory>, grants: Arc<dyn GrantPolicy>) -> Self {
        Self { users, grants }
    }

    /// Authorizer with the default grants
    pub fn with_default_grants(users: Arc<dyn UserDirectory>) -> Self {
        Self::new(users, Arc::new(DefaultGrants))
    }

    /// Evaluate a token against the invoked method
    ///
    /// `parameters` is `None` when the configuration could not be loaded.
    pub async fn authorize(
        &self,
        parameters: Option<&EngineParameters>,
        token: &str,
        method_arn: &str,
    ) -> PermissionDocument {
        let scope = ApiScope::from_method_arn(method_arn);

        let Some(parameters) = parameters else {
            error!("Configuration unavailable, denying request");
            return deny_all_document(&scope);
        };

        let Some(principal) = self.resolve_principal(parameters, token).await else {
            return deny_all_document(&scope);
        };

        match self.document_for(&principal, &scope) {
            Ok(document) => {
                info!(
                    principal_id = %principal.id,
                    principal_type = %principal.principal_type,
                    "Request authorized"
                );
                document
            }
            Err(e) => {
                error!(principal_id = %principal.id, error = %e, "Failed to build permission document");
                deny_all_document(&scope)
            }
        }
    }

    /// Map a token to a principal, if it identifies one
    pub async fn resolve_principal(&self, parameters: &EngineParameters, token: &str) -> Option<Principal> {
        let Some(rules) = parameters.authorizer.as_ref() else {
            warn!("No authorizer rules configured");
            return None;
        };

        let shape = match parse_token(token, rules) {
            Ok(shape) => shape,
            Err(rejection) => {
                info!(rejection = ?rejection, "Token rejected");
                return None;
            }
        };

        match shape.principal_type {
            PrincipalType::Device => {
                if !parameters.device_valid_tokens.is_empty()
                    && !parameters.device_valid_tokens.iter().any(|t| t == shape.value)
                {
                    info!("Device token not on the allow-list");
                    return None;
                }
                Some(Principal {
                    id: format!("{}{}", shape.prefix, shape.value),
                    principal_type: PrincipalType::Device,
                })
            }
            PrincipalType::User => {
                let user_id = self.users.resolve_principal_by_access_token(shape.value).await?;
                debug!(user_id = %user_id, "User token resolved");
                Some(Principal {
                    id: user_id,
                    principal_type: PrincipalType::User,
                })
            }
        }
    }

    fn document_for(&self, principal: &Principal, scope: &ApiScope) -> Result<PermissionDocument, PolicyError> {
        policy::build(
            &principal.id,
            scope,
            &self.grants.allow_entries(principal),
            &self.grants.deny_entries(principal),
        )
    }
}

/// Deny everything for an unidentified caller
pub fn deny_all_document(scope: &ApiScope) -> PermissionDocument {
    policy::deny_all(UNKNOWN_PRINCIPAL, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::StaticUserDirectory;
    use serde_json::json;
    use shared::types::Effect;

    const METHOD_ARN: &str = "arn:aws:execute-api:eu-west-1:123456789012:abc123/dev/POST/register";
    const DEVICE_TOKEN: &str = "DeviceToken NjWO2tVh6fVAeNuLwRsPi-c6N7SP5-DT";

    fn parameters() -> EngineParameters {
        EngineParameters::from_value(json!({
            "THING_TYPE_NAME_RULE": "Cvm",
            "AUTHORIZER": {
                "TOKEN_PAYLOAD_LENGTH": 2,
                "TOKEN_IDENTIFIER_DEVICE": "DeviceToken",
                "TOKEN_IDENTIFIER_USER": "JWT"
            }
        }))
        .unwrap()
    }

    fn authorizer() -> TokenAuthorizer {
        let users = StaticUserDirectory::new().with_user("good-access-token", "user-42");
        TokenAuthorizer::with_default_grants(Arc::new(users))
    }

    fn assert_all_deny(document: &PermissionDocument) {
        assert_eq!(document.principal_id, UNKNOWN_PRINCIPAL);
        assert!(document.is_all_deny());
        for statement in document.statements() {
            assert_eq!(statement.effect, Effect::Deny);
            assert!(statement.resource.iter().all(|r| r.ends_with("/*/*")));
        }
    }

    #[test]
    fn test_parse_token() {
        let rules = TokenRules::default();
        let shape = parse_token(DEVICE_TOKEN, &rules).unwrap();
        assert_eq!(shape.prefix, "DeviceToken");
        assert_eq!(shape.principal_type, PrincipalType::Device);

        assert_eq!(parse_token("DeviceToken-123", &rules), Err(TokenRejection::Malformed));
        assert_eq!(parse_token("DeviceToken ", &rules), Err(TokenRejection::Malformed));
        assert_eq!(parse_token("DeviceToken a b", &rules), Err(TokenRejection::Malformed));
        assert_eq!(parse_token("Token 123", &rules), Err(TokenRejection::UnknownPrefix));
    }

    #[test]
    fn test_parse_token_splits_on_whitespace_runs() {
        let rules = TokenRules::default();

        let shape = parse_token("DeviceToken   abc", &rules).unwrap();
        assert_eq!((shape.prefix, shape.value), ("DeviceToken", "abc"));

        let shape = parse_token("\tDeviceToken\tabc \n", &rules).unwrap();
        assert_eq!((shape.prefix, shape.value), ("DeviceToken", "abc"));

        assert_eq!(parse_token("  DeviceToken  ", &rules), Err(TokenRejection::Malformed));
    }

    #[tokio::test]
    async fn test_padded_device_token_allows_register() {
        let params = parameters();
        let document = authorizer().authorize(Some(&params), "DeviceToken  abc ", METHOD_ARN).await;

        assert_eq!(document.principal_id, "DeviceTokenabc");
        assert_eq!(document.statements()[0].effect, Effect::Allow);
    }

    #[tokio::test]
    async fn test_device_token_allows_register() {
        let params = parameters();
        let document = authorizer().authorize(Some(&params), DEVICE_TOKEN, METHOD_ARN).await;

        assert_eq!(document.principal_id, "DeviceTokenNjWO2tVh6fVAeNuLwRsPi-c6N7SP5-DT");
        let allow = &document.statements()[0];
        assert_eq!(allow.effect, Effect::Allow);
        assert_eq!(
            allow.resource,
            vec!["arn:aws:execute-api:eu-west-1:123456789012:abc123/dev/POST/register".to_string()]
        );
        assert_eq!(document.version(), "2012-10-17");
    }

    #[tokio::test]
    async fn test_malformed_token_denied() {
        let params = parameters();
        let document = authorizer().authorize(Some(&params), "DeviceToken-123", METHOD_ARN).await;
        assert_all_deny(&document);
    }

    #[tokio::test]
    async fn test_unknown_prefix_denied() {
        let params = parameters();
        let document = authorizer().authorize(Some(&params), "Token 123", METHOD_ARN).await;
        assert_all_deny(&document);
    }

    #[tokio::test]
    async fn test_user_token() {
        let params = parameters();
        let authorizer = authorizer();

        let document = authorizer
            .authorize(Some(&params), "JWT good-access-token", METHOD_ARN)
            .await;
        assert_eq!(document.principal_id, "user-42");
        assert_eq!(document.statements().len(), 1);
        assert_eq!(document.statements()[0].resource.len(), 2);
        assert!(document.statements()[0].resource[0].ends_with("/*/agents/*"));

        let document = authorizer.authorize(Some(&params), "JWT forged", METHOD_ARN).await;
        assert_all_deny(&document);
    }

    #[tokio::test]
    async fn test_device_allow_list() {
        let mut params = parameters();
        params.device_valid_tokens = vec!["known-device".to_string()];
        let authorizer = authorizer();

        let document = authorizer
            .authorize(Some(&params), "DeviceToken known-device", METHOD_ARN)
            .await;
        assert!(document.allows_anything());

        let document = authorizer.authorize(Some(&params), DEVICE_TOKEN, METHOD_ARN).await;
        assert_all_deny(&document);
    }

    #[tokio::test]
    async fn test_missing_configuration_denies() {
        let document = authorizer().authorize(None, DEVICE_TOKEN, METHOD_ARN).await;
        assert_all_deny(&document);

        let mut params = parameters();
        params.authorizer = None;
        let document = authorizer().authorize(Some(&params), DEVICE_TOKEN, METHOD_ARN).await;
        assert_all_deny(&document);
    }

    #[tokio::test]
    async fn test_invalid_grant_path_falls_back_to_deny() {
        struct BrokenGrants;
        impl GrantPolicy for BrokenGrants {
            fn allow_entries(&self, _principal: &Principal) -> Vec<PolicyEntry> {
                vec![PolicyEntry::new(HttpVerb::Get, "/agents/{id}")]
            }
        }

        let params = parameters();
        let authorizer = TokenAuthorizer::new(Arc::new(StaticUserDirectory::new()), Arc::new(BrokenGrants));
        let document = authorizer.authorize(Some(&params), DEVICE_TOKEN, METHOD_ARN).await;
        assert_all_deny(&document);
    }
}
