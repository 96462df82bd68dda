// API key check on the X-API-Key header

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::models::AppState;
use crate::types::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

// Compare without short-circuiting on the first differing byte
fn keys_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check a provided key against the configured one. No configured key means
/// the check is disabled.
pub fn verify_api_key(expected: Option<&str>, provided: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match provided.map(str::trim).filter(|k| !k.is_empty()) {
        None => Err(AppError::MissingApiKey),
        Some(key) if keys_match(key, expected) => Ok(()),
        Some(_) => Err(AppError::InvalidApiKey),
    }
}

pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match verify_api_key(state.config.auth.api_key.as_deref(), provided) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            debug!(path = %req.uri().path(), "API key check failed");
            e.into_response()
        }
    }
}
