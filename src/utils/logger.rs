// Logger initialization and request logging

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::models::StructuredDocument;

pub const DEFAULT_LOG_FILTER: &str = "sciflow_api=debug,tower_http=debug,axum=debug";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_logger() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Summary of a served research request
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub research_id: String,
    pub query: String,
    pub total_tokens: u64,
    pub citations: usize,
    pub formatting_failed: bool,
}

impl RequestLogEntry {
    pub fn from_document(document: &StructuredDocument) -> Self {
        Self {
            research_id: document.research_id.clone(),
            query: document.query.clone(),
            total_tokens: document
                .usage
                .get("total_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            citations: document.citations.len(),
            formatting_failed: document.metadata.formatting_failed,
        }
    }
}

/// Record the request off the response path
pub fn log_request(entry: RequestLogEntry) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            research_id = %entry.research_id,
            query = %entry.query,
            total_tokens = entry.total_tokens,
            citations = entry.citations,
            formatting_failed = entry.formatting_failed,
            "Research request served"
        );
    })
}
