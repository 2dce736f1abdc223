//! JSON response envelope shared by every endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// `{success, data?, error?{code, message}}`
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

/// Stable error codes; part of the API contract.
pub mod codes {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const CONCURRENT_UPDATE: &str = "CONCURRENT_UPDATE";
    pub const STORAGE_UNAVAILABLE: &str = "STORAGE_UNAVAILABLE";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";
}

pub fn ok(data: JsonValue) -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

pub fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }),
    )
        .into_response()
}

/// Map a command failure onto the envelope.
pub fn command_error(err: &flowra_infra::CommandError) -> Response {
    use flowra_core::DomainError;
    use flowra_infra::CommandError;

    match err {
        CommandError::Validation(v) => {
            error(StatusCode::BAD_REQUEST, codes::VALIDATION_FAILED, v.to_string())
        }
        CommandError::Domain(DomainError::InvalidStatusTransition { .. }) => {
            error(StatusCode::CONFLICT, codes::INVALID_TRANSITION, err.to_string())
        }
        CommandError::Domain(DomainError::NotFound) => {
            error(StatusCode::NOT_FOUND, codes::NOT_FOUND, err.to_string())
        }
        CommandError::Domain(DomainError::AlreadyExists) => {
            error(StatusCode::CONFLICT, codes::ALREADY_EXISTS, err.to_string())
        }
        CommandError::Domain(_) => {
            error(StatusCode::BAD_REQUEST, codes::VALIDATION_FAILED, err.to_string())
        }
        CommandError::ConcurrentUpdate(msg) => {
            error(StatusCode::CONFLICT, codes::CONCURRENT_UPDATE, msg.clone())
        }
        CommandError::Deserialize(_) | CommandError::CorruptStream(_) | CommandError::Store(_) => {
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE_UNAVAILABLE,
                err.to_string(),
            )
        }
    }
}
