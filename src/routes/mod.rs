//! API Routes
//!
//! - `POST /api/v1/research/deep-research` (also `/research/deep-research`)
//! - `GET /health`
//!
//! Every response carries `X-Process-Time`. Unknown paths, wrong methods and
//! panics are answered with the shared error body.

pub mod extract;
pub mod health;
pub mod research;

use std::any::Any;

use axum::{response::Response, Router};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::middleware::{cors_layer, process_time_middleware};
use crate::models::AppState;
use crate::types::AppError;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let expose_internal = !state.config.server.is_production();
    let cors = cors_layer(&state.config.server);

    Router::new()
        .merge(research::router(state.clone()))
        .merge(health::router(state))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            panic_response(panic, expose_internal)
        }))
        .layer(axum::middleware::from_fn(process_time_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> AppError {
    AppError::NotFound
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Turn a handler panic into a 500 with the shared error body
pub fn panic_response(panic: Box<dyn Any + Send + 'static>, expose_internal: bool) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!("Handler panicked: {}", detail);
    AppError::Internal(detail).into_response_with(expose_internal)
}
