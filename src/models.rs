use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::Config;
use crate::llm::{PerplexityClient, ResearchProvider};
use crate::middleware::{build_rate_limiter, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub provider: Arc<dyn ResearchProvider>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    /// State backed by the Perplexity client and the configured limiter
    pub fn new(config: Config) -> Self {
        let provider = Arc::new(PerplexityClient::new(&config.upstream));
        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: Config, provider: Arc<dyn ResearchProvider>) -> Self {
        let rate_limiter = build_rate_limiter(&config.rate_limit);
        Self {
            config,
            provider,
            rate_limiter,
        }
    }
}

// API Request/Response types

/// Default instruction sent as the system message when the caller does not
/// provide one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an academic research assistant focused on producing \
deep, extensive scientific analyses grounded in the MEDICAL literature. Search ONLY official sites of \
medical journals or indexers such as PubMed, SciELO and NEJM. Write detailed, well-structured answers \
organized into clear sections with titles and subtitles. Use only factual, evidence-based information. \
Include relevant statistical data and cite every source. Present multiple perspectives when appropriate. \
Your answer must read as a complete systematic literature review with introduction, methodology (when \
applicable), results, discussion and conclusion. Do not use lay websites; if the search returns \
non-scientific sites, actively exclude them from the final answer.";

fn default_system_prompt() -> Option<String> {
    Some(DEFAULT_SYSTEM_PROMPT.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeepResearchRequest {
    #[validate(length(min = 5, max = 500))]
    pub query: String,
    /// Absent means the default instruction; explicit `null` sends none
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<String>,
    #[validate(nested)]
    pub options: Option<GenerationOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyFilter {
    Day,
    Week,
    Month,
    Year,
    None,
}

pub mod defaults {
    pub const TEMPERATURE: f64 = 0.1;
    pub const TOP_P: f64 = 0.95;
    pub const FREQUENCY_PENALTY: f64 = 1.0;
    pub const PRESENCE_PENALTY: f64 = 0.0;
    pub const WEB_SEARCH_CONTEXT_SIZE: &str = "high";

    pub fn temperature() -> f64 {
        TEMPERATURE
    }
    pub fn top_p() -> f64 {
        TOP_P
    }
    pub fn frequency_penalty() -> f64 {
        FREQUENCY_PENALTY
    }
    pub fn presence_penalty() -> f64 {
        PRESENCE_PENALTY
    }
    pub fn web_search_context_size() -> String {
        WEB_SEARCH_CONTEXT_SIZE.to_string()
    }
}

/// Sampling and search options forwarded to the provider. Every field the
/// caller leaves out takes the server default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationOptions {
    #[serde(default = "defaults::temperature")]
    #[validate(range(min = 0.0, exclusive_max = 2.0))]
    pub temperature: f64,
    #[serde(default = "defaults::top_p")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub top_p: f64,
    #[serde(default)]
    pub search_domain_filter: Option<Vec<String>>,
    #[serde(default)]
    pub search_recency_filter: Option<RecencyFilter>,
    #[serde(default = "defaults::frequency_penalty")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub frequency_penalty: f64,
    #[serde(default = "defaults::presence_penalty")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub presence_penalty: f64,
    #[serde(default = "defaults::web_search_context_size")]
    pub web_search_context_size: String,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: defaults::TEMPERATURE,
            top_p: defaults::TOP_P,
            search_domain_filter: None,
            search_recency_filter: None,
            frequency_penalty: defaults::FREQUENCY_PENALTY,
            presence_penalty: defaults::PRESENCE_PENALTY,
            web_search_context_size: defaults::web_search_context_size(),
        }
    }
}

/// The article returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub research_id: String,
    pub query: String,
    /// Formatted scientific article (markdown)
    pub content: String,
    /// Unmodified provider answer
    pub raw_content: String,
    pub citations: Vec<String>,
    /// Provider token usage, passed through as-is
    pub usage: serde_json::Value,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub model: String,
    /// Provider creation timestamp, passed through as-is
    pub created: serde_json::Value,
    pub formatting_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub formatting_failed: bool,
}

/// Shared JSON shape for every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub message: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub version: String,
}
