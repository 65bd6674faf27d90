//! Per-request context: request id, loaded engine parameters and the
//! collaborator handles the engine talks to.

use std::sync::Arc;
use uuid::Uuid;

use crate::configuration::{load_parameters, ConfigurationProvider, EngineParameters};
use crate::directory::IdentityDirectory;
use crate::trust::TrustSource;
use crate::users::UserDirectory;

/// External collaborators, shared by all requests
#[derive(Clone)]
pub struct Collaborators {
    pub config: Arc<dyn ConfigurationProvider>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub trust: Arc<dyn TrustSource>,
}

/// State scoped to a single request
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Uuid,

    /// `None` when the configuration document could not be loaded
    pub parameters: Option<EngineParameters>,

    pub collaborators: Collaborators,
}

impl RequestContext {
    /// Load the parameter document for a new request
    pub async fn load(collaborators: &Collaborators, config_path: &str) -> Self {
        let parameters = load_parameters(collaborators.config.as_ref(), config_path).await;
        Self::new(collaborators.clone(), parameters)
    }

    pub fn new(collaborators: Collaborators, parameters: Option<EngineParameters>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            parameters,
            collaborators,
        }
    }

    pub fn directory(&self) -> &dyn IdentityDirectory {
        self.collaborators.directory.as_ref()
    }

    pub fn trust(&self) -> &dyn TrustSource {
        self.collaborators.trust.as_ref()
    }
}
