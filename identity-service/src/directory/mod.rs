//! # Identity Directory
//!
//! The registry of thing types, things, certificates and policies that the
//! registration engine reads and mutates. Every operation returns a tagged
//! [`DirectoryError`] so callers can tell "not found" and "conflict" apart
//! from transport failures.
//!
//! [`InMemoryDirectory`] is the local backend: it issues real self-signed
//! X.509 certificates and supports fault injection per operation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use shared::{
    error::DirectoryError,
    types::{CertificateBundle, DeviceRegistrationRecord, KeyPair},
};

use crate::configuration::EngineParameters;

/// A freshly created certificate and its directory handle
#[derive(Debug, Clone)]
pub struct ProvisionedCertificate {
    pub bundle: CertificateBundle,
    pub handle: String,
}

/// Thing / certificate / policy registry
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Look up a thing by name
    async fn describe_by_name(&self, thing_name: &str) -> Result<DeviceRegistrationRecord, DirectoryError>;

    /// All known thing type names
    async fn list_type_names(&self) -> Result<Vec<String>, DirectoryError>;

    /// Handle of a pre-existing policy
    async fn get_policy_handle(&self, policy_name: &str) -> Result<String, DirectoryError>;

    /// Create a new active certificate and key pair
    async fn create_certificate(&self) -> Result<ProvisionedCertificate, DirectoryError>;

    /// Attach a policy to a certificate
    async fn attach_policy(&self, policy_name: &str, certificate_handle: &str) -> Result<(), DirectoryError>;

    /// Create a thing record
    async fn create_record(
        &self,
        thing_name: &str,
        thing_type: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<DeviceRegistrationRecord, DirectoryError>;

    /// Bind a certificate as the thing's principal
    async fn bind_principal(&self, thing_name: &str, certificate_handle: &str) -> Result<(), DirectoryError>;
}

// =============================================================================
// IN-MEMORY DIRECTORY
// =============================================================================

/// Directory operations, used for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryOperation {
    DescribeByName,
    ListTypeNames,
    GetPolicyHandle,
    CreateCertificate,
    AttachPolicy,
    CreateRecord,
    BindPrincipal,
}

#[derive(Debug, Default)]
struct CertificateEntry {
    policies: Vec<String>,
    things: Vec<String>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    thing_types: Vec<String>,
    policies: HashMap<String, String>,
    things: HashMap<String, DeviceRegistrationRecord>,
    certificates: HashMap<String, CertificateEntry>,
    principals: HashMap<String, HashSet<String>>,
}

/// Local identity directory
pub struct InMemoryDirectory {
    region: String,
    account_id: String,
    state: RwLock<DirectoryState>,
    faults: Mutex<HashMap<DirectoryOperation, DirectoryError>>,
    /// Only kept when enabled with [`with_call_log`](Self::with_call_log)
    calls: Option<Mutex<Vec<DirectoryOperation>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory scoped to a region and account
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            state: RwLock::new(DirectoryState::default()),
            faults: Mutex::new(HashMap::new()),
            calls: None,
        }
    }

    /// Create a directory holding every thing type and policy the parameters name
    pub fn seeded_from(region: impl Into<String>, account_id: impl Into<String>, parameters: &EngineParameters) -> Self {
        let directory = Self::new(region, account_id);
        let (thing_types, policies) = parameters.declared_names();

        for thing_type in thing_types {
            directory.add_thing_type(thing_type);
        }
        for policy in policies {
            directory.add_policy(policy);
        }

        directory
    }

    /// Record every operation invoked, in order
    pub fn with_call_log(mut self) -> Self {
        self.calls = Some(Mutex::new(Vec::new()));
        self
    }

    /// Builder form of [`add_thing_type`](Self::add_thing_type)
    pub fn with_thing_type(self, name: impl Into<String>) -> Self {
        self.add_thing_type(name);
        self
    }

    /// Builder form of [`add_policy`](Self::add_policy)
    pub fn with_policy(self, name: impl Into<String>) -> Self {
        self.add_policy(name);
        self
    }

    /// Register a thing type
    pub fn add_thing_type(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.state.write();
        if !state.thing_types.contains(&name) {
            state.thing_types.push(name);
        }
    }

    /// Register a pre-existing policy
    pub fn add_policy(&self, name: impl Into<String>) {
        let name = name.into();
        let arn = format!("arn:aws:iot:{}:{}:policy/{}", self.region, self.account_id, name);
        self.state.write().policies.insert(name, arn);
    }

    /// Make every subsequent call of `operation` fail with `error`
    pub fn fail_on(&self, operation: DirectoryOperation, error: DirectoryError) {
        self.faults.lock().insert(operation, error);
    }

    /// Remove an injected fault
    pub fn clear_fault(&self, operation: DirectoryOperation) {
        self.faults.lock().remove(&operation);
    }

    /// Operations invoked so far, in order; empty unless the log is enabled
    pub fn calls(&self) -> Vec<DirectoryOperation> {
        self.calls
            .as_ref()
            .map(|calls| calls.lock().clone())
            .unwrap_or_default()
    }

    /// Number of logged invocations of one operation
    pub fn call_count(&self, operation: DirectoryOperation) -> usize {
        self.calls
            .as_ref()
            .map(|calls| calls.lock().iter().filter(|op| **op == operation).count())
            .unwrap_or(0)
    }

    /// Number of certificates issued
    pub fn certificate_count(&self) -> usize {
        self.state.read().certificates.len()
    }

    /// Certificates not bound to any thing
    pub fn orphaned_certificates(&self) -> Vec<String> {
        let state = self.state.read();
        let mut orphans: Vec<String> = state
            .certificates
            .iter()
            .filter(|(_, entry)| entry.things.is_empty())
            .map(|(handle, _)| handle.clone())
            .collect();
        orphans.sort();
        orphans
    }

    /// Policies attached to a certificate
    pub fn policies_of(&self, certificate_handle: &str) -> Vec<String> {
        self.state
            .read()
            .certificates
            .get(certificate_handle)
            .map(|entry| entry.policies.clone())
            .unwrap_or_default()
    }

    /// Certificates bound to a thing
    pub fn principals_of(&self, thing_name: &str) -> Vec<String> {
        let mut principals: Vec<String> = self
            .state
            .read()
            .principals
            .get(thing_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        principals.sort();
        principals
    }

    fn enter(&self, operation: DirectoryOperation) -> Result<(), DirectoryError> {
        if let Some(calls) = &self.calls {
            calls.lock().push(operation);
        }
        match self.faults.lock().get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn certificate_arn(&self, id: &str) -> String {
        format!("arn:aws:iot:{}:{}:cert/{}", self.region, self.account_id, id)
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn describe_by_name(&self, thing_name: &str) -> Result<DeviceRegistrationRecord, DirectoryError> {
        self.enter(DirectoryOperation::DescribeByName)?;

        self.state
            .read()
            .things
            .get(thing_name)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("thing '{}'", thing_name)))
    }

    async fn list_type_names(&self) -> Result<Vec<String>, DirectoryError> {
        self.enter(DirectoryOperation::ListTypeNames)?;
        Ok(self.state.read().thing_types.clone())
    }

    async fn get_policy_handle(&self, policy_name: &str) -> Result<String, DirectoryError> {
        self.enter(DirectoryOperation::GetPolicyHandle)?;

        self.state
            .read()
            .policies
            .get(policy_name)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("policy '{}'", policy_name)))
    }

    async fn create_certificate(&self) -> Result<ProvisionedCertificate, DirectoryError> {
        self.enter(DirectoryOperation::CreateCertificate)?;

        let id = Uuid::new_v4().simple().to_string();
        let CertifiedKey { cert, key_pair } = generate_simple_self_signed(vec![format!("cert-{}.local", id)])
            .map_err(|e| DirectoryError::Transport(format!("certificate generation failed: {}", e)))?;

        let handle = self.certificate_arn(&id);
        let bundle = CertificateBundle {
            pem: cert.pem(),
            key_pair: KeyPair {
                public_key: key_pair.public_key_pem(),
                private_key: key_pair.serialize_pem(),
            },
            certificate_arn: handle.clone(),
        };

        self.state
            .write()
            .certificates
            .insert(handle.clone(), CertificateEntry::default());

        info!(certificate = %handle, "Certificate created");
        Ok(ProvisionedCertificate { bundle, handle })
    }

    async fn attach_policy(&self, policy_name: &str, certificate_handle: &str) -> Result<(), DirectoryError> {
        self.enter(DirectoryOperation::AttachPolicy)?;

        let mut state = self.state.write();
        if !state.policies.contains_key(policy_name) {
            return Err(DirectoryError::NotFound(format!("policy '{}'", policy_name)));
        }

        let entry = state
            .certificates
            .get_mut(certificate_handle)
            .ok_or_else(|| DirectoryError::NotFound(format!("certificate '{}'", certificate_handle)))?;

        if !entry.policies.iter().any(|p| p == policy_name) {
            entry.policies.push(policy_name.to_string());
        }

        debug!(policy = %policy_name, certificate = %certificate_handle, "Policy attached");
        Ok(())
    }

    async fn create_record(
        &self,
        thing_name: &str,
        thing_type: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<DeviceRegistrationRecord, DirectoryError> {
        self.enter(DirectoryOperation::CreateRecord)?;

        let mut state = self.state.write();
        if !state.thing_types.iter().any(|t| t == thing_type) {
            return Err(DirectoryError::NotFound(format!("thing type '{}'", thing_type)));
        }
        if state.things.contains_key(thing_name) {
            return Err(DirectoryError::Conflict(format!("thing '{}' already exists", thing_name)));
        }

        let record = DeviceRegistrationRecord {
            thing_name: thing_name.to_string(),
            thing_type_name: thing_type.to_string(),
            thing_attributes: attributes.clone(),
            creation_date: Utc::now(),
        };
        state.things.insert(thing_name.to_string(), record.clone());

        debug!(thing_name = %thing_name, thing_type = %thing_type, "Thing record created");
        Ok(record)
    }

    async fn bind_principal(&self, thing_name: &str, certificate_handle: &str) -> Result<(), DirectoryError> {
        self.enter(DirectoryOperation::BindPrincipal)?;

        let mut state = self.state.write();
        if !state.things.contains_key(thing_name) {
            return Err(DirectoryError::NotFound(format!("thing '{}'", thing_name)));
        }

        let entry = state
            .certificates
            .get_mut(certificate_handle)
            .ok_or_else(|| DirectoryError::NotFound(format!("certificate '{}'", certificate_handle)))?;
        entry.things.push(thing_name.to_string());

        state
            .principals
            .entry(thing_name.to_string())
            .or_default()
            .insert(certificate_handle.to_string());

        debug!(thing_name = %thing_name, certificate = %certificate_handle, "Principal bound");
        Ok(())
    }
}
