//! # REST API for Identity Service
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /register` - Liveness ping
//! - `POST /register` - Register a new device
//! - `POST /authorize` - Evaluate a bearer token for the API gateway

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Instrument};

use shared::{
    constants::{AUTHORIZE_PATH, REGISTER_PATH},
    types::AuthorizationRequest,
};

use crate::authorizer::deny_all_document;
use crate::context::RequestContext;
use crate::policy::ApiScope;
use crate::registration::parse_payload;
use crate::response::{authorization_response, ping_response, registration_response};
use crate::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.config.api.max_body_size;
    let enable_cors = state.config.api.enable_cors;

    let router = Router::new()
        // Health check
        .route("/health", get(health_check))
        .route(REGISTER_PATH, get(ping).post(register_device))
        .route(AUTHORIZE_PATH, post(authorize))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": shared::VERSION,
    }))
}

/// Liveness ping
async fn ping() -> Response {
    ping_response()
}

/// Register a new device
///
/// # Request Body
/// ```json
/// {
///   "thingName": "Sensor-01",
///   "accountToken": "acc-123",
///   "version": "1.2.0",
///   "attributes": { "site": "lab" }
/// }
/// ```
///
/// # Response
/// ```json
/// {
///   "certificateData": {
///     "pem": "-----BEGIN CERTIFICATE-----...",
///     "keyPair": { "publicKey": "...", "privateKey": "..." },
///     "certificateArn": "arn:aws:iot:..."
///   },
///   "rootCa": "-----BEGIN CERTIFICATE-----..."
/// }
/// ```
async fn register_device(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let ctx = RequestContext::load(&state.collaborators, &state.config.app_config_path).await;
    let span = info_span!("register", request_id = %ctx.request_id);

    async move {
        info!(body_len = body.len(), "Device registration request received");

        let result = match parse_payload(&body) {
            Ok(payload) => state.engine.register(&ctx, &payload).await,
            Err(e) => {
                warn!(error = %e, "Registration body rejected");
                Err(e)
            }
        };

        registration_response(result)
    }
    .instrument(span)
    .await
}

/// Evaluate a bearer token
///
/// Always answers 200; a body without the expected fields gets the all-deny
/// document.
async fn authorize(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let ctx = RequestContext::load(&state.collaborators, &state.config.app_config_path).await;
    let span = info_span!("authorize", request_id = %ctx.request_id);

    async move {
        let request = match serde_json::from_slice::<AuthorizationRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed authorizer event");
                return authorization_response(deny_all_document(&scope_of_raw_event(&body)));
            }
        };

        info!(method_arn = %request.method_arn, request_type = %request.request_type, "Authorization request received");

        let document = state
            .authorizer
            .authorize(
                ctx.parameters.as_ref(),
                &request.authorization_token,
                &request.method_arn,
            )
            .await;

        authorization_response(document)
    }
    .instrument(span)
    .await
}

/// Best effort scope of an event that failed to decode
fn scope_of_raw_event(body: &[u8]) -> ApiScope {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("methodArn").and_then(Value::as_str).map(ApiScope::from_method_arn))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use shared::{
        config::IdentityServiceConfig,
        types::{ErrorResponse, PermissionDocument},
    };
    use tower::ServiceExt;

    use crate::configuration::{EngineParameters, StaticConfigProvider};
    use crate::context::Collaborators;
    use crate::directory::InMemoryDirectory;
    use crate::trust::StaticTrustSource;
    use crate::users::StaticUserDirectory;

    const CONFIG_PATH: &str = "/thing-vending/test/config-parameters";
    const METHOD_ARN: &str = "arn:aws:execute-api:eu-west-1:123456789012:abc123/dev/POST/register";

    fn document() -> Value {
        json!({
            "THING_TYPE_NAME_RULE": "Cvm",
            "POLICIES": { "CvmAgent": { "name": "agentPolicy" } },
            "ATTRIBUTES": { "CvmAgent": [{ "name": "creationDate" }, { "name": "version" }] },
            "AUTHORIZER": {
                "TOKEN_PAYLOAD_LENGTH": 2,
                "TOKEN_IDENTIFIER_DEVICE": "DeviceToken",
                "TOKEN_IDENTIFIER_USER": "JWT"
            }
        })
    }

    fn router() -> Router {
        let parameters = EngineParameters::from_value(document()).unwrap();
        let mut config = IdentityServiceConfig::default();
        config.app_config_path = CONFIG_PATH.into();

        let collaborators = Collaborators {
            config: Arc::new(StaticConfigProvider::with_document(CONFIG_PATH, document())),
            directory: Arc::new(InMemoryDirectory::seeded_from("eu-west-1", "123456789012", &parameters)),
            users: Arc::new(StaticUserDirectory::new()),
            trust: Arc::new(StaticTrustSource::new()),
        };

        create_router(Arc::new(AppState::new(config, collaborators)))
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ping_and_unsupported_verbs() {
        let response = router()
            .oneshot(Request::get("/register").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ping: Value = read_json(response).await;
        assert_eq!(ping["response"], json!(true));

        let response = router()
            .oneshot(Request::delete("/register").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_register_then_conflict() {
        let app = router();
        let body = json!({ "thingName": "Sensor-01", "accountToken": "acc-1", "version": "1.0" });

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/register", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload: Value = read_json(response).await;
        assert!(payload["certificateData"]["pem"]
            .as_str()
            .unwrap()
            .starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(payload["rootCa"], json!(false));

        let response = app
            .oneshot(json_request(Method::POST, "/register", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error: ErrorResponse = read_json(response).await;
        assert_eq!(error.error, "Thing already registered");
    }

    #[tokio::test]
    async fn test_register_bad_payloads() {
        let response = router()
            .oneshot(json_request(
                Method::POST,
                "/register",
                json!({ "accountToken": "acc-1", "version": "1.0" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::post("/register").body(Body::from("{oops")).unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = read_json(response).await;
        assert!(!error.status);
    }

    #[tokio::test]
    async fn test_authorize_device_token() {
        let event = json!({
            "authorizationToken": "DeviceToken NjWO2tVh6fVAeNuLwRsPi-c6N7SP5-DT",
            "methodArn": METHOD_ARN,
            "type": "TOKEN"
        });
        let response = router()
            .oneshot(json_request(Method::POST, "/authorize", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let document: PermissionDocument = read_json(response).await;
        assert_eq!(document.principal_id, "DeviceTokenNjWO2tVh6fVAeNuLwRsPi-c6N7SP5-DT");
        assert!(document.allows_anything());
    }

    #[tokio::test]
    async fn test_authorize_malformed_event_is_denied() {
        let response = router()
            .oneshot(json_request(Method::POST, "/authorize", json!({ "methodArn": METHOD_ARN })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let document: PermissionDocument = read_json(response).await;
        assert!(document.is_all_deny());
        assert_eq!(
            document.statements()[0].resource,
            vec!["arn:aws:execute-api:eu-west-1:123456789012:abc123/dev/*/*".to_string()]
        );
    }
}
