// Perplexity chat-completions client
// API Reference: https://docs.perplexity.ai/api-reference/chat-completions

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::UpstreamConfig;
use crate::llm::provider::{ProviderResponse, ResearchProvider, UpstreamError};
use crate::models::{DeepResearchRequest, GenerationOptions, RecencyFilter};
use crate::utils::retry::{with_retry, RetryPolicy};

const DEFAULT_ERROR_MESSAGE: &str = "Perplexity API error";
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(10);

/// Budget left after backoff, split over the attempts plus one spare share
/// so the last attempt gives up before the total budget does
fn attempt_timeout(budget: Duration, retry: RetryPolicy) -> Duration {
    let shares = retry.max_attempts.saturating_add(1);
    let usable = match budget.checked_sub(retry.total_backoff()) {
        Some(left) if !left.is_zero() => left,
        _ => budget,
    };
    (usable / shares).max(MIN_ATTEMPT_TIMEOUT)
}

fn http_client(connect_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebSearchOptions {
    pub search_context_size: String,
}

// Request body for the chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub max_tokens: u32,
    pub stream: bool,
    pub web_search_options: WebSearchOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_domain_filter: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_recency_filter: Option<RecencyFilter>,
}

pub struct PerplexityClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    retry: RetryPolicy,
    max_domain_filters: usize,
}

impl PerplexityClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let timeout = config.request_timeout();
        let retry = RetryPolicy::new(config.max_retries, config.retry_backoff_base());
        Self {
            client: http_client(attempt_timeout(timeout, retry)),
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout,
            retry,
            max_domain_filters: config.max_domain_filters,
        }
    }

    /// Override the total time budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = http_client(self.attempt_timeout());
        self
    }

    /// Time allowed for a single attempt
    pub fn attempt_timeout(&self) -> Duration {
        attempt_timeout(self.timeout, self.retry)
    }

    fn build_messages(query: &str, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);

        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage {
                role: Role::System,
                content: prompt.to_string(),
            });
        }

        messages.push(ChatMessage {
            role: Role::User,
            content: query.to_string(),
        });

        messages
    }

    /// Build the outbound payload. Domain filters beyond the configured
    /// bound are dropped.
    pub fn build_payload(&self, request: &DeepResearchRequest) -> ChatCompletionRequest {
        let options = request.options.clone().unwrap_or_default();
        let GenerationOptions {
            temperature,
            top_p,
            search_domain_filter,
            search_recency_filter,
            frequency_penalty,
            presence_penalty,
            web_search_context_size,
        } = options;

        let search_domain_filter = search_domain_filter
            .filter(|domains| !domains.is_empty())
            .map(|mut domains| {
                if domains.len() > self.max_domain_filters {
                    warn!(
                        requested = domains.len(),
                        limit = self.max_domain_filters,
                        "Truncating search domain filter"
                    );
                    domains.truncate(self.max_domain_filters);
                }
                domains
            })
            .filter(|domains| !domains.is_empty());

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::build_messages(&request.query, request.system_prompt.as_deref()),
            temperature,
            top_p,
            frequency_penalty,
            presence_penalty,
            max_tokens: self.max_tokens,
            stream: false,
            web_search_options: WebSearchOptions {
                search_context_size: web_search_context_size,
            },
            search_domain_filter,
            search_recency_filter,
        }
    }

    async fn send_once(
        &self,
        payload: &ChatCompletionRequest,
        attempt: u32,
    ) -> Result<Value, UpstreamError> {
        debug!(attempt, url = %self.api_url, "Sending research request");

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .timeout(self.attempt_timeout())
            .json(payload)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                message: e.to_string(),
                attempts: attempt,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| UpstreamError::Transport {
            message: format!("Failed to read response body: {}", e),
            attempts: attempt,
        })?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| UpstreamError::InvalidResponse(format!("body is not JSON: {}", e)))
    }
}

/// Turn a non-2xx answer into an error, preferring `error.message` from a
/// JSON body and falling back to the raw text
fn status_error(status: u16, text: &str) -> UpstreamError {
    match serde_json::from_str::<Value>(text) {
        Ok(body) => {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or(DEFAULT_ERROR_MESSAGE)
                .to_string();
            UpstreamError::Status {
                status,
                message,
                body,
            }
        }
        Err(_) => {
            let message = if text.trim().is_empty() {
                DEFAULT_ERROR_MESSAGE.to_string()
            } else {
                text.trim().to_string()
            };
            UpstreamError::Status {
                status,
                message,
                body: Value::String(text.to_string()),
            }
        }
    }
}

#[async_trait]
impl ResearchProvider for PerplexityClient {
    async fn execute(&self, request: &DeepResearchRequest) -> Result<ProviderResponse, UpstreamError> {
        let payload = self.build_payload(request);

        let attempts = with_retry(
            self.retry,
            |attempt| self.send_once(&payload, attempt),
            UpstreamError::is_transport,
        );

        let body = tokio::time::timeout(self.timeout, attempts)
            .await
            .map_err(|_| {
                warn!(timeout = ?self.timeout, "Research request exceeded its time budget");
                UpstreamError::Timeout(self.timeout)
            })??;

        let research_id = Uuid::new_v4().to_string();
        info!(research_id = %research_id, model = %self.model, "Research API call succeeded");

        Ok(ProviderResponse::new(body).with_research_id(research_id))
    }
}
