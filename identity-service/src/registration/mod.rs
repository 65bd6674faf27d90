//! # Registration Engine
//!
//! Provisions and binds a device identity exactly once per thing name.
//!
//! ```text
//! Start -> CheckExistence -> AlreadyExists
//!                         -> Provisioning -> Binding -> Sealing -> Done
//!                                         -> ProvisionFailed
//! ```
//!
//! Once a certificate exists nothing is rolled back: a failure while binding
//! leaves the certificate orphaned and it is reported for manual cleanup.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info, warn};

use shared::{
    constants::{ATTRIBUTE_CREATION_DATE, ATTRIBUTE_VERSION, THING_NAME_PATTERN},
    error::{DirectoryError, ProvisioningStage, RegistrationError},
    types::{
        CertificateBundle, DeviceRegistrationRecord, DeviceRegistrationRequest, DeviceRegistrationResponse,
        TrustChain,
    },
};

use crate::configuration::EngineParameters;
use crate::context::RequestContext;
use crate::trust::fetch_trust_chain;

static THING_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(THING_NAME_PATTERN).unwrap());

// =============================================================================
// VALIDATION
// =============================================================================

/// Request shape check, run before any directory call
pub trait RequestValidator: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<DeviceRegistrationRequest, RegistrationError>;
}

/// Required string fields plus the directory naming rule
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl SchemaValidator {
    fn required_string<'a>(object: &'a serde_json::Map<String, Value>, field: &str) -> Result<&'a str, RegistrationError> {
        match object.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
            Some(Value::String(_)) => Err(RegistrationError::Validation(format!("'{}' must not be empty", field))),
            Some(_) => Err(RegistrationError::Validation(format!("'{}' must be a string", field))),
            None => Err(RegistrationError::Validation(format!("'{}' is a required property", field))),
        }
    }
}

impl RequestValidator for SchemaValidator {
    fn validate(&self, payload: &Value) -> Result<DeviceRegistrationRequest, RegistrationError> {
        let object = payload
            .as_object()
            .ok_or_else(|| RegistrationError::Validation("request body must be a JSON object".into()))?;

        let thing_name = Self::required_string(object, "thingName")?;
        let account_token = Self::required_string(object, "accountToken")?;
        let version = Self::required_string(object, "version")?;

        if !THING_NAME.is_match(thing_name) {
            return Err(RegistrationError::Validation(format!(
                "'thingName' does not match {}",
                THING_NAME_PATTERN
            )));
        }

        let mut attributes = BTreeMap::new();
        match object.get("attributes") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    let Value::String(value) = value else {
                        return Err(RegistrationError::Validation(format!(
                            "attribute '{}' must be a string",
                            key
                        )));
                    };
                    attributes.insert(key.clone(), value.clone());
                }
            }
            Some(_) => {
                return Err(RegistrationError::Validation("'attributes' must be an object".into()));
            }
        }

        Ok(DeviceRegistrationRequest {
            thing_name: thing_name.to_string(),
            account_token: account_token.to_string(),
            version: version.to_string(),
            attributes,
        })
    }
}

/// Decode a raw request body
pub fn parse_payload(body: &[u8]) -> Result<Value, RegistrationError> {
    serde_json::from_slice(body)
        .map_err(|e| RegistrationError::Validation(format!("request body is not valid JSON: {}", e)))
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Registration progress, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Start,
    CheckExistence,
    AlreadyExists,
    Provisioning,
    Binding,
    Sealing,
    Done,
    ProvisionFailed,
    /// Stopped before provisioning (validation, configuration, directory outage)
    Aborted,
}

impl RegistrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RegistrationState::AlreadyExists
                | RegistrationState::Done
                | RegistrationState::ProvisionFailed
                | RegistrationState::Aborted
        )
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Start => "start",
            RegistrationState::CheckExistence => "check_existence",
            RegistrationState::AlreadyExists => "already_exists",
            RegistrationState::Provisioning => "provisioning",
            RegistrationState::Binding => "binding",
            RegistrationState::Sealing => "sealing",
            RegistrationState::Done => "done",
            RegistrationState::ProvisionFailed => "provision_failed",
            RegistrationState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

struct Transitions<'a> {
    thing_name: &'a str,
    state: RegistrationState,
}

impl<'a> Transitions<'a> {
    fn new(thing_name: &'a str) -> Self {
        Self {
            thing_name,
            state: RegistrationState::Start,
        }
    }

    fn advance(&mut self, next: RegistrationState) {
        info!(
            thing_name = %self.thing_name,
            from = %self.state,
            to = %next,
            "Registration state transition"
        );
        self.state = next;
    }

    /// Move to the failure state matching `err` and hand it back
    fn fail(&mut self, err: RegistrationError) -> RegistrationError {
        let next = match &err {
            RegistrationError::AlreadyRegistered { .. } => RegistrationState::AlreadyExists,
            RegistrationError::ProvisioningFailed { .. } => RegistrationState::ProvisionFailed,
            _ if self.state == RegistrationState::Binding => RegistrationState::ProvisionFailed,
            _ => RegistrationState::Aborted,
        };
        self.advance(next);
        err
    }
}

/// Successful registration
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub bundle: CertificateBundle,
    pub trust_chain: TrustChain,
    pub record: DeviceRegistrationRecord,
}

impl From<RegistrationOutcome> for DeviceRegistrationResponse {
    fn from(outcome: RegistrationOutcome) -> Self {
        DeviceRegistrationResponse {
            certificate_data: outcome.bundle,
            root_ca: outcome.trust_chain,
        }
    }
}

/// Decisions derived from configuration before anything is provisioned
struct RegistrationPlan {
    thing_type: String,
    policy_name: String,
    allowed_attributes: Vec<String>,
}

/// Device registration state machine
pub struct RegistrationEngine {
    validator: Box<dyn RequestValidator>,
}

impl Default for RegistrationEngine {
    fn default() -> Self {
        Self::new(Box::new(SchemaValidator))
    }
}

impl RegistrationEngine {
    pub fn new(validator: Box<dyn RequestValidator>) -> Self {
        Self { validator }
    }

    /// Register a device from its raw request payload
    pub async fn register(
        &self,
        ctx: &RequestContext,
        payload: &Value,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let result = match self.validator.validate(payload) {
            Ok(request) => self.run(ctx, &request).await,
            Err(e) => Err(e),
        };
        finish(ctx, result)
    }

    /// Register an already decoded request; it is validated like a payload
    pub async fn register_request(
        &self,
        ctx: &RequestContext,
        request: &DeviceRegistrationRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let result = match serde_json::to_value(request) {
            Ok(payload) => match self.validator.validate(&payload) {
                Ok(request) => self.run(ctx, &request).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(RegistrationError::Validation(e.to_string())),
        };
        finish(ctx, result)
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        request: &DeviceRegistrationRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let mut machine = Transitions::new(&request.thing_name);

        let Some(parameters) = ctx.parameters.as_ref() else {
            return Err(machine.fail(RegistrationError::DirectoryUnavailable(
                "configuration document unavailable".into(),
            )));
        };

        machine.advance(RegistrationState::CheckExistence);
        let plan = match self.check_existence(ctx, parameters, request).await {
            Ok(plan) => plan,
            Err(e) => return Err(machine.fail(e)),
        };

        machine.advance(RegistrationState::Provisioning);
        let directory = ctx.directory();
        let certificate = match directory.create_certificate().await {
            Ok(certificate) => certificate,
            Err(e) => {
                return Err(machine.fail(RegistrationError::ProvisioningFailed {
                    stage: ProvisioningStage::CreateCertificate,
                    orphaned_certificate: None,
                    reason: e.to_string(),
                }))
            }
        };
        let handle = certificate.handle.as_str();

        machine.advance(RegistrationState::Binding);
        if let Err(e) = directory.attach_policy(&plan.policy_name, handle).await {
            return Err(machine.fail(orphaned(request, ProvisioningStage::AttachPolicy, handle, e)));
        }

        let attributes = seal_attributes(request, &plan.allowed_attributes, Utc::now().timestamp());
        let record = match directory
            .create_record(&request.thing_name, &plan.thing_type, &attributes)
            .await
        {
            Ok(record) => record,
            Err(DirectoryError::Conflict(reason)) => {
                error!(
                    reconciliation = true,
                    thing_name = %request.thing_name,
                    certificate = %handle,
                    reason = %reason,
                    "Lost registration race, certificate left orphaned"
                );
                return Err(machine.fail(RegistrationError::AlreadyRegistered {
                    thing_name: request.thing_name.clone(),
                }));
            }
            Err(e) => {
                return Err(machine.fail(orphaned(request, ProvisioningStage::CreateRecord, handle, e)));
            }
        };

        if let Err(e) = directory.bind_principal(&request.thing_name, handle).await {
            return Err(machine.fail(orphaned(request, ProvisioningStage::BindPrincipal, handle, e)));
        }

        machine.advance(RegistrationState::Sealing);
        let trust_chain = fetch_trust_chain(ctx.trust(), &parameters.aws_root_ca).await;

        machine.advance(RegistrationState::Done);
        Ok(RegistrationOutcome {
            bundle: certificate.bundle,
            trust_chain,
            record,
        })
    }

    /// Everything that must hold before a certificate is created
    async fn check_existence(
        &self,
        ctx: &RequestContext,
        parameters: &EngineParameters,
        request: &DeviceRegistrationRequest,
    ) -> Result<RegistrationPlan, RegistrationError> {
        let directory = ctx.directory();

        let type_names = directory
            .list_type_names()
            .await
            .map_err(|e| RegistrationError::DirectoryUnavailable(e.to_string()))?;
        let thing_type = select_thing_type(&type_names, &parameters.thing_type_name_rule)
            .ok_or_else(|| {
                RegistrationError::Configuration(format!(
                    "no thing type matches rule '{}'",
                    parameters.thing_type_name_rule
                ))
            })?
            .to_string();
        debug!(thing_type = %thing_type, "Thing type selected");

        match directory.describe_by_name(&request.thing_name).await {
            Ok(_) => {
                return Err(RegistrationError::AlreadyRegistered {
                    thing_name: request.thing_name.clone(),
                })
            }
            Err(DirectoryError::NotFound(_)) => {}
            Err(e) => return Err(RegistrationError::DirectoryUnavailable(e.to_string())),
        }

        let policy_name = parameters
            .policy_for(&thing_type)
            .ok_or_else(|| RegistrationError::Configuration(format!("no policy configured for '{}'", thing_type)))?
            .to_string();

        match directory.get_policy_handle(&policy_name).await {
            Ok(_) => {}
            Err(DirectoryError::NotFound(_)) => {
                return Err(RegistrationError::Configuration(format!(
                    "policy '{}' does not exist",
                    policy_name
                )))
            }
            Err(e) => return Err(RegistrationError::DirectoryUnavailable(e.to_string())),
        }

        let allowed_attributes = parameters
            .allowed_attributes(&thing_type)
            .ok_or_else(|| {
                RegistrationError::Configuration(format!("no attribute allow-list for '{}'", thing_type))
            })?
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(RegistrationPlan {
            thing_type,
            policy_name,
            allowed_attributes,
        })
    }
}

fn orphaned(
    request: &DeviceRegistrationRequest,
    stage: ProvisioningStage,
    handle: &str,
    err: DirectoryError,
) -> RegistrationError {
    error!(
        reconciliation = true,
        thing_name = %request.thing_name,
        certificate = %handle,
        stage = %stage,
        error = %err,
        "Certificate left orphaned"
    );
    RegistrationError::ProvisioningFailed {
        stage,
        orphaned_certificate: Some(handle.to_string()),
        reason: err.to_string(),
    }
}

fn finish(
    ctx: &RequestContext,
    result: Result<RegistrationOutcome, RegistrationError>,
) -> Result<RegistrationOutcome, RegistrationError> {
    match &result {
        Ok(outcome) => info!(
            request_id = %ctx.request_id,
            thing_name = %outcome.record.thing_name,
            certificate = %outcome.bundle.certificate_arn,
            "Device registered"
        ),
        Err(e) => report_failure(ctx, e),
    }
    result
}

fn report_failure(ctx: &RequestContext, err: &RegistrationError) {
    let request_id = ctx.request_id;
    match err {
        RegistrationError::Validation(detail) => {
            warn!(request_id = %request_id, detail = %detail, "Registration request rejected")
        }
        RegistrationError::AlreadyRegistered { thing_name } => {
            info!(request_id = %request_id, thing_name = %thing_name, "Thing already registered")
        }
        RegistrationError::Configuration(detail) => {
            error!(request_id = %request_id, alert = true, detail = %detail, "Registration misconfigured")
        }
        other => error!(request_id = %request_id, kind = other.kind(), error = %other, "Registration failed"),
    }
}

/// First type name containing the rule, ignoring case
pub fn select_thing_type<'a>(type_names: &'a [String], rule: &str) -> Option<&'a str> {
    let rule = rule.to_lowercase();
    type_names
        .iter()
        .find(|name| name.to_lowercase().contains(&rule))
        .map(String::as_str)
}

/// Attributes written on the thing record
///
/// Caller attributes are overlaid by the creation date (epoch seconds) and
/// the agent version, then reduced to the type's allow-list.
pub fn seal_attributes(
    request: &DeviceRegistrationRequest,
    allowed: &[String],
    created_at: i64,
) -> BTreeMap<String, String> {
    let mut attributes = request.attributes.clone();
    attributes.insert(ATTRIBUTE_CREATION_DATE.to_string(), created_at.to_string());
    attributes.insert(ATTRIBUTE_VERSION.to_string(), request.version.clone());

    attributes.retain(|name, _| allowed.iter().any(|a| a == name));
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> DeviceRegistrationRequest {
        SchemaValidator
            .validate(&json!({
                "thingName": "Sensor-01",
                "accountToken": "acc-123",
                "version": "1.2.0",
                "attributes": { "site": "lab", "owner": "ops" }
            }))
            .unwrap()
    }

    #[test]
    fn test_validator_accepts_complete_request() {
        let request = request();
        assert_eq!(request.thing_name, "Sensor-01");
        assert_eq!(request.attributes.len(), 2);
    }

    #[test]
    fn test_validator_rejects_missing_fields() {
        let err = SchemaValidator
            .validate(&json!({ "accountToken": "a", "version": "1" }))
            .unwrap_err();
        assert_eq!(err, RegistrationError::Validation("'thingName' is a required property".into()));

        let err = SchemaValidator
            .validate(&json!({ "thingName": "t", "accountToken": "", "version": "1" }))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));

        let err = SchemaValidator
            .validate(&json!({ "thingName": "t", "accountToken": "a", "version": 1 }))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));
    }

    #[test]
    fn test_validator_rejects_bad_names_and_attributes() {
        let err = SchemaValidator
            .validate(&json!({ "thingName": "bad name!", "accountToken": "a", "version": "1" }))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));

        let err = SchemaValidator
            .validate(&json!({
                "thingName": "ok", "accountToken": "a", "version": "1",
                "attributes": { "site": 7 }
            }))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));

        assert!(SchemaValidator.validate(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_parse_payload() {
        assert!(parse_payload(br#"{"thingName":"x"}"#).is_ok());
        assert!(matches!(parse_payload(b"{not json"), Err(RegistrationError::Validation(_))));
    }

    #[test]
    fn test_select_thing_type() {
        let names = vec!["Gateway".to_string(), "CvmAgent".to_string(), "cvmOther".to_string()];
        assert_eq!(select_thing_type(&names, "cvm"), Some("CvmAgent"));
        assert_eq!(select_thing_type(&names, "Sensor"), None);
    }

    #[test]
    fn test_seal_attributes_filters_and_overlays() {
        let mut request = request();
        request.attributes.insert("version".into(), "spoofed".into());

        let allowed = vec!["creationDate".to_string(), "version".to_string(), "site".to_string()];
        let attributes = seal_attributes(&request, &allowed, 1_700_000_000);

        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes["creationDate"], "1700000000");
        assert_eq!(attributes["version"], "1.2.0");
        assert_eq!(attributes["site"], "lab");
        assert!(!attributes.contains_key("owner"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RegistrationState::Done.is_terminal());
        assert!(RegistrationState::AlreadyExists.is_terminal());
        assert!(!RegistrationState::Binding.is_terminal());
        assert_eq!(RegistrationState::CheckExistence.to_string(), "check_existence");
    }
}
