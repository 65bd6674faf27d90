//! # Permission Policy Builder
//!
//! Builds the allow/deny documents returned to the API gateway.
//!
//! Statement layout is observable by the gateway and must stay stable:
//! allow statements precede deny statements, and within one effect every
//! conditioned entry gets its own statement, followed by a single statement
//! merging all unconditioned resources.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use shared::{
    constants::RESOURCE_PATH_PATTERN,
    error::PolicyError,
    types::{Conditions, Effect, PermissionDocument, Statement},
};

static RESOURCE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(RESOURCE_PATH_PATTERN).unwrap());

/// HTTP verbs accepted in resource ARNs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Head,
    Delete,
    Options,
    /// Any verb (`*`)
    All,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Head => "HEAD",
            HttpVerb::Delete => "DELETE",
            HttpVerb::Options => "OPTIONS",
            HttpVerb::All => "*",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpVerb::Get),
            "POST" => Ok(HttpVerb::Post),
            "PUT" => Ok(HttpVerb::Put),
            "PATCH" => Ok(HttpVerb::Patch),
            "HEAD" => Ok(HttpVerb::Head),
            "DELETE" => Ok(HttpVerb::Delete),
            "OPTIONS" => Ok(HttpVerb::Options),
            "*" => Ok(HttpVerb::All),
            other => Err(PolicyError::InvalidVerb(other.to_string())),
        }
    }
}

/// Account / API / stage scope of generated resource ARNs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiScope {
    pub region: String,
    pub account_id: String,
    pub rest_api_id: String,
    pub stage: String,
}

impl Default for ApiScope {
    fn default() -> Self {
        Self {
            region: "*".into(),
            account_id: "*".into(),
            rest_api_id: "*".into(),
            stage: "*".into(),
        }
    }
}

impl ApiScope {
    /// Extract the scope from a method ARN
    ///
    /// `arn:aws:execute-api:<region>:<account>:<apiId>/<stage>/<verb>/<path>`.
    /// Missing or empty components fall back to `*`.
    pub fn from_method_arn(method_arn: &str) -> Self {
        let mut scope = Self::default();
        let parts: Vec<&str> = method_arn.split(':').collect();
        if parts.len() < 6 || parts[0] != "arn" {
            return scope;
        }

        let pick = |value: &str, target: &mut String| {
            if !value.is_empty() {
                *target = value.to_string();
            }
        };

        pick(parts[3], &mut scope.region);
        pick(parts[4], &mut scope.account_id);

        let mut api_path = parts[5].split('/');
        if let Some(api_id) = api_path.next() {
            pick(api_id, &mut scope.rest_api_id);
        }
        if let Some(stage) = api_path.next() {
            pick(stage, &mut scope.stage);
        }

        scope
    }

    /// Build the resource ARN for a verb and resource path
    pub fn resource_arn(&self, verb: HttpVerb, resource_path: &str) -> Result<String, PolicyError> {
        if !RESOURCE_PATH.is_match(resource_path) {
            return Err(PolicyError::InvalidResourcePath {
                path: resource_path.to_string(),
                pattern: RESOURCE_PATH_PATTERN,
            });
        }

        let resource = resource_path.strip_prefix('/').unwrap_or(resource_path);

        Ok(format!(
            "arn:aws:execute-api:{}:{}:{}/{}/{}/{}",
            self.region, self.account_id, self.rest_api_id, self.stage, verb, resource
        ))
    }
}

/// One requested grant or denial
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEntry {
    pub verb: HttpVerb,
    pub resource_path: String,
    pub conditions: Option<Conditions>,
}

impl PolicyEntry {
    pub fn new(verb: HttpVerb, resource_path: impl Into<String>) -> Self {
        Self {
            verb,
            resource_path: resource_path.into(),
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

#[derive(Debug, Clone)]
struct MethodGrant {
    resource_arn: String,
    conditions: Option<Conditions>,
}

/// Incremental builder of a permission document
#[derive(Debug, Clone)]
pub struct PermissionPolicyBuilder {
    principal_id: String,
    scope: ApiScope,
    allow: Vec<MethodGrant>,
    deny: Vec<MethodGrant>,
}

impl PermissionPolicyBuilder {
    pub fn new(principal_id: impl Into<String>, scope: ApiScope) -> Self {
        Self {
            principal_id: principal_id.into(),
            scope,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    /// Add a method; the resource path is validated immediately
    pub fn add_method(
        &mut self,
        effect: Effect,
        verb: HttpVerb,
        resource_path: &str,
        conditions: Option<Conditions>,
    ) -> Result<&mut Self, PolicyError> {
        let grant = MethodGrant {
            resource_arn: self.scope.resource_arn(verb, resource_path)?,
            conditions: conditions.filter(|c| !c.is_empty()),
        };

        match effect {
            Effect::Allow => self.allow.push(grant),
            Effect::Deny => self.deny.push(grant),
        }
        Ok(self)
    }

    /// Add an entry with the given effect
    pub fn add_entry(&mut self, effect: Effect, entry: &PolicyEntry) -> Result<&mut Self, PolicyError> {
        self.add_method(effect, entry.verb, &entry.resource_path, entry.conditions.clone())
    }

    pub fn allow_method(&mut self, verb: HttpVerb, resource_path: &str) -> Result<&mut Self, PolicyError> {
        self.add_method(Effect::Allow, verb, resource_path, None)
    }

    pub fn deny_method(&mut self, verb: HttpVerb, resource_path: &str) -> Result<&mut Self, PolicyError> {
        self.add_method(Effect::Deny, verb, resource_path, None)
    }

    pub fn allow_method_with_conditions(
        &mut self,
        verb: HttpVerb,
        resource_path: &str,
        conditions: Conditions,
    ) -> Result<&mut Self, PolicyError> {
        self.add_method(Effect::Allow, verb, resource_path, Some(conditions))
    }

    pub fn deny_method_with_conditions(
        &mut self,
        verb: HttpVerb,
        resource_path: &str,
        conditions: Conditions,
    ) -> Result<&mut Self, PolicyError> {
        self.add_method(Effect::Deny, verb, resource_path, Some(conditions))
    }

    /// Allow every verb on every resource of the scope
    pub fn allow_all_methods(&mut self) -> Result<&mut Self, PolicyError> {
        self.add_method(Effect::Allow, HttpVerb::All, "*", None)
    }

    /// Deny every verb on every resource of the scope
    pub fn deny_all_methods(&mut self) -> Result<&mut Self, PolicyError> {
        self.add_method(Effect::Deny, HttpVerb::All, "*", None)
    }

    /// Assemble the document
    pub fn build(&self) -> Result<PermissionDocument, PolicyError> {
        if self.allow.is_empty() && self.deny.is_empty() {
            return Err(PolicyError::EmptyPolicy);
        }

        let mut statements = statements_for_effect(Effect::Allow, &self.allow);
        statements.extend(statements_for_effect(Effect::Deny, &self.deny));

        Ok(PermissionDocument::new(self.principal_id.clone(), statements))
    }
}

fn statements_for_effect(effect: Effect, grants: &[MethodGrant]) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut merged = Statement::empty(effect);

    for grant in grants {
        match &grant.conditions {
            Some(conditions) => {
                let mut conditional = Statement::empty(effect);
                conditional.resource.push(grant.resource_arn.clone());
                conditional.condition = Some(conditions.clone());
                statements.push(conditional);
            }
            None => merged.resource.push(grant.resource_arn.clone()),
        }
    }

    if !merged.resource.is_empty() {
        statements.push(merged);
    }
    statements
}

/// Build a document from allow and deny entries in one call
pub fn build(
    principal_id: &str,
    scope: &ApiScope,
    allow_entries: &[PolicyEntry],
    deny_entries: &[PolicyEntry],
) -> Result<PermissionDocument, PolicyError> {
    let mut builder = PermissionPolicyBuilder::new(principal_id, scope.clone());
    for entry in allow_entries {
        builder.add_entry(Effect::Allow, entry)?;
    }
    for entry in deny_entries {
        builder.add_entry(Effect::Deny, entry)?;
    }
    builder.build()
}

/// The all-deny document for a scope
///
/// Assembled directly so it is available even when building fails.
pub fn deny_all(principal_id: &str, scope: &ApiScope) -> PermissionDocument {
    let mut statement = Statement::empty(Effect::Deny);
    statement.resource.push(format!(
        "arn:aws:execute-api:{}:{}:{}/{}/*/*",
        scope.region, scope.account_id, scope.rest_api_id, scope.stage
    ));
    PermissionDocument::new(principal_id, vec![statement])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const METHOD_ARN: &str = "arn:aws:execute-api:us-east-1:112646120612:n8il2c2eic/prod/POST/register";

    fn scope() -> ApiScope {
        ApiScope::from_method_arn(METHOD_ARN)
    }

    fn condition(key: &str) -> Conditions {
        json!({ "IpAddress": { "aws:SourceIp": key } })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_scope_from_method_arn() {
        let scope = scope();
        assert_eq!(scope.region, "us-east-1");
        assert_eq!(scope.account_id, "112646120612");
        assert_eq!(scope.rest_api_id, "n8il2c2eic");
        assert_eq!(scope.stage, "prod");
    }

    #[test]
    fn test_scope_from_garbage_is_wildcard() {
        assert_eq!(ApiScope::from_method_arn("not-an-arn"), ApiScope::default());
        assert_eq!(ApiScope::from_method_arn(""), ApiScope::default());
    }

    #[test]
    fn test_resource_arn_strips_leading_slash() {
        let arn = scope().resource_arn(HttpVerb::Post, "/register").unwrap();
        assert_eq!(arn, "arn:aws:execute-api:us-east-1:112646120612:n8il2c2eic/prod/POST/register");
    }

    #[test]
    fn test_invalid_resource_path() {
        let err = scope().resource_arn(HttpVerb::Get, "/agents/{id}").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidResourcePath { .. }));

        let err = scope().resource_arn(HttpVerb::Get, "").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidResourcePath { .. }));
    }

    #[test]
    fn test_verb_parsing() {
        assert_eq!("POST".parse::<HttpVerb>().unwrap(), HttpVerb::Post);
        assert_eq!("*".parse::<HttpVerb>().unwrap(), HttpVerb::All);
        assert_eq!(
            "TRACE".parse::<HttpVerb>().unwrap_err(),
            PolicyError::InvalidVerb("TRACE".into())
        );
    }

    #[test]
    fn test_empty_policy_rejected() {
        let err = build("device", &scope(), &[], &[]).unwrap_err();
        assert_eq!(err, PolicyError::EmptyPolicy);
    }

    #[test]
    fn test_unconditioned_entries_merge_per_effect() {
        let document = build(
            "user-1",
            &scope(),
            &[
                PolicyEntry::new(HttpVerb::All, "/agents/*"),
                PolicyEntry::new(HttpVerb::All, "/keys/*"),
            ],
            &[PolicyEntry::new(HttpVerb::Delete, "/keys/*")],
        )
        .unwrap();

        let statements = document.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].effect, Effect::Allow);
        assert_eq!(statements[0].resource.len(), 2);
        assert_eq!(statements[1].effect, Effect::Deny);
        assert_eq!(document.version(), "2012-10-17");
    }

    #[test]
    fn test_statement_ordering() {
        let document = build(
            "user-1",
            &scope(),
            &[
                PolicyEntry::new(HttpVerb::Get, "/agents/*"),
                PolicyEntry::new(HttpVerb::Post, "/keys").with_conditions(condition("10.0.0.0/8")),
            ],
            &[
                PolicyEntry::new(HttpVerb::Delete, "/agents/*"),
                PolicyEntry::new(HttpVerb::Put, "/keys").with_conditions(condition("0.0.0.0/0")),
            ],
        )
        .unwrap();

        let layout: Vec<(Effect, bool)> = document
            .statements()
            .iter()
            .map(|s| (s.effect, s.condition.is_some()))
            .collect();
        assert_eq!(
            layout,
            vec![
                (Effect::Allow, true),
                (Effect::Allow, false),
                (Effect::Deny, true),
                (Effect::Deny, false),
            ]
        );
    }

    #[test]
    fn test_empty_conditions_count_as_unconditioned() {
        let mut builder = PermissionPolicyBuilder::new("device", scope());
        builder
            .allow_method_with_conditions(HttpVerb::Post, "/register", Conditions::new())
            .unwrap();
        let document = builder.build().unwrap();
        assert_eq!(document.statements().len(), 1);
        assert!(document.statements()[0].condition.is_none());
    }

    #[test]
    fn test_building_twice_is_identical() {
        let allow = [
            PolicyEntry::new(HttpVerb::All, "/agents/*"),
            PolicyEntry::new(HttpVerb::Get, "/keys/*").with_conditions(condition("10.0.0.0/8")),
        ];
        let first = build("user-1", &scope(), &allow, &[]).unwrap();
        let second = build("user-1", &scope(), &allow, &[]).unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_deny_all_matches_builder_output() {
        let mut builder = PermissionPolicyBuilder::new("unknown", scope());
        builder.deny_all_methods().unwrap();
        assert_eq!(builder.build().unwrap(), deny_all("unknown", &scope()));
    }
}
