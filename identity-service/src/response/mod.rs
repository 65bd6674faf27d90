//! # Response Translation
//!
//! Maps engine outcomes to HTTP status codes and JSON payloads. Collaborator
//! error detail is logged here and never sent to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use shared::{
    error::RegistrationError,
    types::{DeviceRegistrationResponse, ErrorResponse, PermissionDocument, PingResponse},
};

use crate::registration::RegistrationOutcome;

/// Caller-facing message for a duplicate registration
pub const ALREADY_REGISTERED_MESSAGE: &str = "Thing already registered";

/// Caller-facing message for every server-side failure
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict,
    Internal(String),
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Validation(detail) => ApiError::BadRequest(detail),
            RegistrationError::AlreadyRegistered { .. } => ApiError::Conflict,
            RegistrationError::DirectoryUnavailable(_)
            | RegistrationError::ProvisioningFailed { .. }
            | RegistrationError::Configuration(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Conflict => ALREADY_REGISTERED_MESSAGE.into(),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal server error");
                INTERNAL_ERROR_MESSAGE.into()
            }
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

/// Registration result as an HTTP response
pub fn registration_response(result: Result<RegistrationOutcome, RegistrationError>) -> Response {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(DeviceRegistrationResponse::from(outcome))).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Authorization always answers 200 with a document
pub fn authorization_response(document: PermissionDocument) -> Response {
    (StatusCode::OK, Json(document)).into_response()
}

/// Liveness answer of `GET /register`
pub fn ping_response() -> Response {
    let ping = PingResponse {
        response: true,
        time: chrono::Utc::now().timestamp(),
    };
    (StatusCode::OK, Json(ping)).into_response()
}
