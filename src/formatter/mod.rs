//! Scientific Document Formatter
//!
//! Turns a raw provider answer into a [`StructuredDocument`]:
//!
//! 1. Extract the answer text from `choices[0].message.content`
//! 2. Discover citations (top-level, message, first choice, then inline
//!    `[n] url` references in the text)
//! 3. Restructure the text as a scientific article ([`article`])
//!
//! Formatting never fails outward. When the payload cannot be read the
//! result is a degraded document flagged in its metadata.

pub mod article;
pub mod sections;

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::llm::ProviderResponse;
use crate::models::{DocumentMetadata, StructuredDocument};

pub use article::{format_citations, structure, structure_with, ArticleStamp};
pub use sections::{extract_sections, SectionMap};

static INLINE_CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+)\]\s+(https?://\S+)").expect("citation pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Provider response does not contain a valid 'choices' field")]
    MissingChoices,

    #[error("Provider message content is not text")]
    InvalidContent,
}

/// Result of formatting: always carries a document
#[derive(Debug, Clone, PartialEq)]
pub enum FormatOutcome {
    Complete(StructuredDocument),
    Degraded {
        document: StructuredDocument,
        error: FormatError,
    },
}

impl FormatOutcome {
    pub fn document(&self) -> &StructuredDocument {
        match self {
            FormatOutcome::Complete(document) => document,
            FormatOutcome::Degraded { document, .. } => document,
        }
    }

    pub fn into_document(self) -> StructuredDocument {
        match self {
            FormatOutcome::Complete(document) => document,
            FormatOutcome::Degraded { document, .. } => document,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FormatOutcome::Degraded { .. })
    }

    pub fn error(&self) -> Option<&FormatError> {
        match self {
            FormatOutcome::Complete(_) => None,
            FormatOutcome::Degraded { error, .. } => Some(error),
        }
    }
}

/// Answer text from the first choice. Missing content is empty; anything
/// other than a string is an error.
fn extract_content(response: &ProviderResponse) -> Result<&str, FormatError> {
    let choice = response
        .choices()
        .and_then(|choices| choices.first())
        .ok_or(FormatError::MissingChoices)?;

    match choice.get("message").and_then(|m| m.get("content")) {
        None | Some(Value::Null) => Ok(""),
        Some(Value::String(content)) => Ok(content),
        Some(_) => Err(FormatError::InvalidContent),
    }
}

/// Whatever text can be read from the first choice, or nothing
fn salvage_content(response: &ProviderResponse) -> String {
    response
        .first_choice()
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .unwrap_or("")
        .to_string()
}

/// URLs from a citations value. Plain strings and `{"url": ...}` objects are
/// accepted, anything else is skipped.
fn citation_urls(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(url) => Some(url.clone()),
                    Value::Object(obj) => obj.get("url").and_then(|u| u.as_str()).map(String::from),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// URLs referenced inline as `[n] http...`, in order of appearance
pub fn scan_inline_citations(content: &str) -> Vec<String> {
    INLINE_CITATION
        .captures_iter(content)
        .filter_map(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Find the citation list, stopping at the first non-empty source
pub fn discover_citations(response: &ProviderResponse, content: &str) -> Vec<String> {
    let body = response.body();
    let sources = [
        ("top-level", body.get("citations")),
        ("message", body.get("message").and_then(|m| m.get("citations"))),
        ("first choice", response.first_choice().and_then(|c| c.get("citations"))),
    ];

    for (source, value) in sources {
        if let Some(value) = value {
            let urls = citation_urls(value);
            if !urls.is_empty() {
                debug!(source, count = urls.len(), "Citations found");
                return urls;
            }
        }
    }

    let urls = scan_inline_citations(content);
    if !urls.is_empty() {
        debug!(count = urls.len(), "Citations extracted from content");
    }
    urls
}

fn research_id_for(response: &ProviderResponse) -> String {
    response
        .research_id()
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn metadata_for(response: &ProviderResponse, error: Option<&FormatError>) -> DocumentMetadata {
    DocumentMetadata {
        model: response.model().to_string(),
        created: response.created(),
        formatting_timestamp: Utc::now().to_rfc3339(),
        error: error.map(|e| e.to_string()),
        formatting_failed: error.is_some(),
    }
}

fn try_format(
    response: &ProviderResponse,
    query: &str,
    stamp: &ArticleStamp,
) -> Result<StructuredDocument, FormatError> {
    let content = extract_content(response)?;
    let citations = discover_citations(response, content);
    let formatted = structure_with(content, query, &citations, stamp);

    Ok(StructuredDocument {
        research_id: research_id_for(response),
        query: query.to_string(),
        content: formatted,
        raw_content: content.to_string(),
        citations,
        usage: response.usage(),
        metadata: metadata_for(response, None),
    })
}

fn degraded_document(
    response: &ProviderResponse,
    query: &str,
    error: &FormatError,
) -> StructuredDocument {
    let content = salvage_content(response);
    let citations = response
        .body()
        .get("citations")
        .map(citation_urls)
        .unwrap_or_default();

    StructuredDocument {
        research_id: research_id_for(response),
        query: query.to_string(),
        content: content.clone(),
        raw_content: content,
        citations,
        usage: response.usage(),
        metadata: metadata_for(response, Some(error)),
    }
}

/// Format a provider answer as a scientific article
pub fn format(response: &ProviderResponse, query: &str) -> FormatOutcome {
    format_with(response, query, &ArticleStamp::generate())
}

/// [`format`] with a caller-supplied article stamp
pub fn format_with(response: &ProviderResponse, query: &str, stamp: &ArticleStamp) -> FormatOutcome {
    match try_format(response, query, stamp) {
        Ok(document) => FormatOutcome::Complete(document),
        Err(error) => {
            warn!(query = %query, "Formatting failed, returning degraded document: {}", error);
            FormatOutcome::Degraded {
                document: degraded_document(response, query, &error),
                error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    const QUERY: &str = "Impact of solar energy on the global energy mix";

    fn stamp() -> ArticleStamp {
        ArticleStamp::new("cafebabe", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
    }

    fn sample_response() -> ProviderResponse {
        ProviderResponse::new(json!({
            "id": "test-id-12345",
            "research_id": "test-research-id",
            "model": "sonar-deep-research",
            "created": 1743529939,
            "usage": {"prompt_tokens": 19, "completion_tokens": 130, "total_tokens": 149},
            "citations": [
                "https://www.example.com/solar-energy-report-2024",
                "https://www.example.org/renewable-energy-trends"
            ],
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "Solar energy is growing.\n\nCosts keep falling."
                }
            }]
        }))
    }

    #[test]
    fn test_format_complete_document() {
        let outcome = format_with(&sample_response(), QUERY, &stamp());
        assert!(!outcome.is_degraded());

        let document = outcome.into_document();
        assert_eq!(document.research_id, "test-research-id");
        assert_eq!(document.query, QUERY);
        assert_eq!(document.raw_content, "Solar energy is growing.\n\nCosts keep falling.");
        assert_eq!(document.citations.len(), 2);
        assert_eq!(document.usage["total_tokens"], 149);
        assert_eq!(document.metadata.model, "sonar-deep-research");
        assert_eq!(document.metadata.created, json!(1743529939));
        assert!(!document.metadata.formatting_failed);
        assert!(document.metadata.error.is_none());

        assert!(document.content.starts_with("# Impact of solar energy on the global energy mix"));
        assert!(document.content.contains("## References"));
        assert!(document.content.contains("[2] https://www.example.org/renewable-energy-trends"));
    }

    #[test]
    fn test_missing_choices_degrades() {
        let response = ProviderResponse::new(json!({
            "model": "sonar-deep-research",
            "citations": ["https://x.org/a"],
            "usage": {"total_tokens": 3}
        }));
        let outcome = format(&response, QUERY);

        assert!(outcome.is_degraded());
        assert_eq!(outcome.error(), Some(&FormatError::MissingChoices));

        let document = outcome.document();
        assert_eq!(document.content, "");
        assert_eq!(document.raw_content, "");
        assert_eq!(document.citations, vec!["https://x.org/a".to_string()]);
        assert_eq!(document.usage["total_tokens"], 3);
        assert!(document.metadata.formatting_failed);
        assert!(document.metadata.error.as_deref().unwrap().contains("choices"));
        assert!(Uuid::parse_str(&document.research_id).is_ok());

        let wire = serde_json::to_value(document).unwrap();
        assert_eq!(wire["metadata"]["formatting_failed"], true);
    }

    #[test]
    fn test_malformed_choices_degrade() {
        for body in [
            json!({"choices": []}),
            json!({"choices": "nope"}),
            json!({"choices": null}),
            json!({"choices": [{"message": {"content": 12}}]}),
        ] {
            let outcome = format(&ProviderResponse::new(body), QUERY);
            assert!(outcome.is_degraded());
            assert!(outcome.document().metadata.formatting_failed);
        }
    }

    #[test]
    fn test_degraded_document_keeps_only_top_level_citations() {
        let response = ProviderResponse::new(json!({
            "message": {"citations": ["https://message.org"]},
            "choices": "not a list"
        }));
        let document = format(&response, QUERY).into_document();
        assert!(document.metadata.formatting_failed);
        assert!(document.citations.is_empty());

        let response = ProviderResponse::new(json!({
            "choices": [{
                "citations": ["https://choice.org"],
                "message": {"content": {"text": "[1] https://inline.org"}}
            }]
        }));
        let document = format(&response, QUERY).into_document();
        assert!(document.metadata.formatting_failed);
        assert!(document.citations.is_empty());
    }

    #[test]
    fn test_missing_content_is_empty_not_error() {
        let response = ProviderResponse::new(json!({"choices": [{"message": {}}]}));
        let outcome = format_with(&response, QUERY, &stamp());
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.document().raw_content, "");
        assert!(outcome.document().content.contains("## Abstract"));
    }

    #[test]
    fn test_citation_fallback_order() {
        let nested_message = ProviderResponse::new(json!({
            "message": {"citations": ["https://message.org"]},
            "choices": [{"citations": ["https://choice.org"], "message": {"content": "x"}}]
        }));
        assert_eq!(discover_citations(&nested_message, "x"), vec!["https://message.org"]);

        let nested_choice = ProviderResponse::new(json!({
            "citations": [],
            "choices": [{"citations": ["https://choice.org"], "message": {"content": "x"}}]
        }));
        assert_eq!(discover_citations(&nested_choice, "x"), vec!["https://choice.org"]);
    }

    #[test]
    fn test_inline_citations_scanned_when_no_field() {
        let content = "Findings [1] https://a.org/paper and [2] http://b.org/x.\n[3]   https://a.org/paper";
        let response = ProviderResponse::new(json!({
            "choices": [{"message": {"content": content}}]
        }));
        let citations = discover_citations(&response, content);
        assert_eq!(
            citations,
            vec!["https://a.org/paper", "http://b.org/x.", "https://a.org/paper"]
        );
    }

    #[test]
    fn test_citation_objects_and_junk() {
        let response = ProviderResponse::new(json!({
            "citations": [{"url": "https://obj.org", "title": "T"}, 5, "https://plain.org"]
        }));
        assert_eq!(
            discover_citations(&response, ""),
            vec!["https://obj.org", "https://plain.org"]
        );
    }

    #[test]
    fn test_research_id_generated_when_absent() {
        let response = ProviderResponse::new(json!({"choices": [{"message": {"content": "x"}}]}));
        let document = format(&response, QUERY).into_document();
        assert!(Uuid::parse_str(&document.research_id).is_ok());
        assert_eq!(document.usage, json!({}));
    }
}
