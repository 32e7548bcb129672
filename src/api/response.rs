//! Response types for the payroll engine API.
//!
//! This module defines the error response structures and the mapping from
//! engine errors to HTTP status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{ComputationError, EngineError};

/// API error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new API error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Creates a validation error response.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    /// Creates a malformed JSON error response.
    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::new("MALFORMED_JSON", message)
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is serving.
    pub status: String,
    /// The engine version.
    pub version: String,
}

/// API error with HTTP status code.
#[derive(Debug)]
pub struct ApiErrorResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The error body.
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<EngineError> for ApiErrorResponse {
    fn from(error: EngineError) -> Self {
        let message = error.to_string();
        let (status, error) = match error {
            EngineError::Validation { .. } => {
                (StatusCode::BAD_REQUEST, ApiError::validation_error(message))
            }
            EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", message)),
            EngineError::Configuration { components, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                if components.is_empty() {
                    ApiError::new("CONFIGURATION_ERROR", message)
                } else {
                    ApiError::with_details(
                        "CONFIGURATION_ERROR",
                        message,
                        format!("components: {}", components.join(", ")),
                    )
                },
            ),
            EngineError::Integrity { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTEGRITY_ERROR", message),
            ),
            EngineError::Evaluation { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("EVALUATION_ERROR", message),
            ),
            EngineError::UsageConflict { .. } => {
                (StatusCode::CONFLICT, ApiError::new("USAGE_CONFLICT", message))
            }
            EngineError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, ApiError::new("TIMEOUT", message)),
            EngineError::ConfigNotFound { path } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::with_details(
                    "CONFIG_ERROR",
                    "Configuration error",
                    format!("Configuration file not found: {}", path),
                ),
            ),
            EngineError::ConfigParseError { path, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::with_details(
                    "CONFIG_ERROR",
                    "Configuration parse error",
                    format!("Failed to parse {}: {}", path, message),
                ),
            ),
        };
        ApiErrorResponse { status, error }
    }
}

impl From<ComputationError> for ApiErrorResponse {
    fn from(error: ComputationError) -> Self {
        let context = match &error.component_code {
            Some(code) => format!(
                "employee '{}', stage {}, component '{}'",
                error.employee_id, error.stage, code
            ),
            None => format!("employee '{}', stage {}", error.employee_id, error.stage),
        };
        let mut response = ApiErrorResponse::from(error.source);
        response.error.details = Some(match response.error.details.take() {
            Some(details) => format!("{}; {}", context, details),
            None => context,
        });
        response
    }
}
