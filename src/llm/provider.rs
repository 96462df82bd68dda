use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::DeepResearchRequest;

/// Errors raised by the upstream research call
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Connection, DNS or body-read failure; retried
    #[error("Communication error with the research API after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: u32 },

    /// The total time budget ran out across all attempts
    #[error("Research API did not answer within {0:?}")]
    Timeout(Duration),

    /// Non-2xx answer; never retried
    #[error("{message} (Status: {status})")]
    Status {
        status: u16,
        message: String,
        /// Parsed error body, or the raw text when it is not JSON
        body: Value,
    },

    #[error("Invalid response from research API: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, UpstreamError::Transport { .. })
    }
}

/// Raw provider payload. Nothing in it is trusted to have the documented
/// shape, so it is kept as JSON and read through lenient accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    research_id: Option<String>,
    body: Value,
}

impl ProviderResponse {
    /// Wrap a provider body, picking up a `research_id` field if it has one
    pub fn new(body: Value) -> Self {
        let research_id = body
            .get("research_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .map(String::from);
        Self { research_id, body }
    }

    pub fn with_research_id(mut self, research_id: impl Into<String>) -> Self {
        self.research_id = Some(research_id.into());
        self
    }

    pub fn research_id(&self) -> Option<&str> {
        self.research_id.as_deref()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn choices(&self) -> Option<&Vec<Value>> {
        self.body.get("choices").and_then(|v| v.as_array())
    }

    pub fn first_choice(&self) -> Option<&Value> {
        self.choices().and_then(|choices| choices.first())
    }

    pub fn model(&self) -> &str {
        self.body.get("model").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn created(&self) -> Value {
        self.body.get("created").cloned().unwrap_or_else(|| Value::String(String::new()))
    }

    /// Token usage counters; an empty object when absent
    pub fn usage(&self) -> Value {
        match self.body.get("usage") {
            Some(usage @ Value::Object(_)) => usage.clone(),
            _ => Value::Object(Default::default()),
        }
    }
}

#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn execute(&self, request: &DeepResearchRequest) -> Result<ProviderResponse, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors_tolerate_missing_fields() {
        let response = ProviderResponse::new(json!({}));
        assert!(response.research_id().is_none());
        assert!(response.choices().is_none());
        assert!(response.first_choice().is_none());
        assert_eq!(response.model(), "");
        assert_eq!(response.created(), json!(""));
        assert_eq!(response.usage(), json!({}));
    }

    #[test]
    fn test_accessors_tolerate_wrong_types() {
        let response = ProviderResponse::new(json!({
            "choices": "not-a-list",
            "model": 42,
            "usage": [1, 2, 3],
            "research_id": 7
        }));
        assert!(response.choices().is_none());
        assert_eq!(response.model(), "");
        assert_eq!(response.usage(), json!({}));
        assert!(response.research_id().is_none());
    }

    #[test]
    fn test_research_id_from_body_and_override() {
        let response = ProviderResponse::new(json!({"research_id": "abc"}));
        assert_eq!(response.research_id(), Some("abc"));

        let response = response.with_research_id("def");
        assert_eq!(response.research_id(), Some("def"));
    }

    #[test]
    fn test_status_code_only_for_status_errors() {
        let err = UpstreamError::Status {
            status: 429,
            message: "Too many requests".to_string(),
            body: Value::Null,
        };
        assert_eq!(err.status_code(), Some(429));
        assert!(!err.is_transport());

        let err = UpstreamError::Transport {
            message: "refused".to_string(),
            attempts: 1,
        };
        assert_eq!(err.status_code(), None);
        assert!(err.is_transport());
    }
}
