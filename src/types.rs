// Error taxonomy and shared result types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::llm::UpstreamError;
use crate::models::ErrorResponse;

/// One rejected field in a request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    /// Path to the field, e.g. `body -> options -> temperature`
    pub loc: String,
    pub msg: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl FieldError {
    pub fn new(loc: impl Into<String>, msg: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            msg: msg.into(),
            error_type: error_type.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error in request data")]
    Validation(Vec<FieldError>),

    #[error("API key not provided in the X-API-Key header")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Rate limit exceeded. Try again in {window_secs} seconds.")]
    RateLimited { window_secs: u64 },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MissingApiKey => StatusCode::UNAUTHORIZED,
            AppError::InvalidApiKey => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(e) => match e {
                UpstreamError::Status { status, .. } => StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY),
                UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                UpstreamError::Transport { .. } | UpstreamError::InvalidResponse(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::MissingApiKey => "missing_api_key",
            AppError::InvalidApiKey => "invalid_api_key",
            AppError::RateLimited { .. } => "rate_limit_exceeded",
            AppError::Upstream(_) => "perplexity_api_error",
            AppError::NotFound => "http_404",
            AppError::MethodNotAllowed => "http_405",
            AppError::Internal(_) => "internal_server_error",
        }
    }

    /// Build the shared error body. Internal details are dropped when
    /// `expose_internal` is false.
    pub fn to_error_response(&self, expose_internal: bool) -> ErrorResponse {
        let details = match self {
            AppError::Validation(fields) => serde_json::to_value(fields).ok(),
            AppError::Upstream(UpstreamError::Status { body, .. }) => Some(body.clone()),
            AppError::Upstream(UpstreamError::Transport { attempts, .. }) => {
                Some(serde_json::json!({ "attempts": attempts }))
            }
            AppError::Internal(detail) if expose_internal => {
                Some(serde_json::Value::String(detail.clone()))
            }
            _ => None,
        };

        let message = match self {
            AppError::Internal(_) if !expose_internal => "Internal server error".to_string(),
            other => other.to_string(),
        };

        ErrorResponse {
            error: true,
            message,
            code: self.code().to_string(),
            details,
        }
    }

    pub fn into_response_with(self, expose_internal: bool) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), status = status.as_u16(), "Request failed: {}", self);
        } else {
            warn!(code = self.code(), status = status.as_u16(), "Request rejected: {}", self);
        }
        (status, Json(self.to_error_response(expose_internal))).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Handlers that know the deployment environment call
        // `into_response_with` directly; the bare conversion is conservative.
        self.into_response_with(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation(vec![]).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::MissingApiKey.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidApiKey.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimited { window_secs: 60 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Upstream(UpstreamError::Timeout(Duration::from_secs(1))).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::Upstream(UpstreamError::Transport {
                message: "connection refused".to_string(),
                attempts: 3,
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_routing_errors() {
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotFound.code(), "http_404");
        assert_eq!(
            AppError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(AppError::MethodNotAllowed.code(), "http_405");
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = AppError::Upstream(UpstreamError::Status {
            status: 401,
            message: "Invalid API key".to_string(),
            body: serde_json::json!({"error": {"message": "Invalid API key"}}),
        });
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let body = err.to_error_response(false);
        assert!(body.error);
        assert_eq!(body.code, "perplexity_api_error");
        assert!(body.message.contains("Invalid API key"));
        assert!(body.details.is_some());
    }

    #[test]
    fn test_internal_details_hidden_in_production() {
        let err = AppError::Internal("database exploded".to_string());

        let hidden = err.to_error_response(false);
        assert_eq!(hidden.message, "Internal server error");
        assert!(hidden.details.is_none());

        let exposed = err.to_error_response(true);
        assert!(exposed.message.contains("database exploded"));
        assert_eq!(
            exposed.details,
            Some(serde_json::Value::String("database exploded".to_string()))
        );
    }

    #[test]
    fn test_validation_details() {
        let err = AppError::Validation(vec![FieldError::new(
            "body -> query",
            "length must be between 5 and 500",
            "length",
        )]);
        let body = err.to_error_response(false);
        let details = body.details.unwrap();
        assert_eq!(details[0]["loc"], "body -> query");
        assert_eq!(details[0]["type"], "length");
    }
}
