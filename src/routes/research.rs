use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{info, warn};

use crate::formatter;
use crate::middleware::{auth_middleware, rate_limiter_middleware};
use crate::models::{AppState, DeepResearchRequest};
use crate::routes::extract::ValidatedJson;
use crate::types::AppError;
use crate::utils::{log_request, RequestLogEntry};

pub const DEEP_RESEARCH_PATH: &str = "/api/v1/research/deep-research";
pub const DEEP_RESEARCH_ALIAS: &str = "/research/deep-research";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(DEEP_RESEARCH_PATH, post(deep_research))
        .route(DEEP_RESEARCH_ALIAS, post(deep_research))
        // Rate limiting runs before the API key check
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limiter_middleware,
        ))
        .with_state(state)
}

async fn deep_research(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<DeepResearchRequest>,
) -> Response {
    info!(query = %request.query, "Received deep research request");

    let raw = match state.provider.execute(&request).await {
        Ok(raw) => raw,
        Err(e) => {
            return AppError::from(e).into_response_with(!state.config.server.is_production());
        }
    };

    let outcome = formatter::format(&raw, &request.query);
    if let Some(error) = outcome.error() {
        warn!(query = %request.query, "Serving unformatted research result: {}", error);
    }
    let document = outcome.into_document();

    // Fire and forget; the response does not wait on logging
    log_request(RequestLogEntry::from_document(&document));

    Json(document).into_response()
}
