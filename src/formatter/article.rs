//! Scientific article layout: title, metadata block, standard sections and
//! the references list.

use chrono::{Local, NaiveDate};
use uuid::Uuid;

use super::sections::{extract_sections, has_heading_structure, INTRODUCTION};

pub const ABSTRACT_HEADING: &str = "## Abstract";
pub const INTRODUCTION_HEADING: &str = "## Introduction";
pub const CONCLUSION_HEADING: &str = "## Conclusion";
pub const REFERENCES_HEADING: &str = "## References";

pub const METHOD_LABEL: &str = "Systematic evidence-based analysis";
pub const CONCLUSION_TEXT: &str = "This analysis demonstrates the complexity and importance of the \
topic addressed, providing a solid foundation for future scientific investigations.";

/// Per-article identity printed in the metadata block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleStamp {
    /// Short hex identifier (8 characters)
    pub article_id: String,
    pub date: NaiveDate,
}

impl ArticleStamp {
    pub fn new(article_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            article_id: article_id.into(),
            date,
        }
    }

    pub fn generate() -> Self {
        let mut article_id = Uuid::new_v4().simple().to_string();
        article_id.truncate(8);
        Self {
            article_id,
            date: Local::now().date_naive(),
        }
    }
}

/// Upper-case the first character and lower-case the rest
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

pub fn title_line(query: &str) -> String {
    format!("# {}", capitalize(query.trim()))
}

pub fn metadata_block(stamp: &ArticleStamp, citation_count: usize) -> String {
    format!(
        "**Article ID**: {}  \n\
         **Publication Date**: {}  \n\
         **Method**: {}  \n\
         **Total Sources Consulted**: {}",
        stamp.article_id,
        stamp.date.format("%d/%m/%Y"),
        METHOD_LABEL,
        citation_count
    )
}

/// Numbered references list; empty when there is nothing to cite
pub fn format_citations(citations: &[String]) -> String {
    if citations.is_empty() {
        return String::new();
    }

    let mut references = format!("{}\n\n", REFERENCES_HEADING);
    for (i, url) in citations.iter().enumerate() {
        references.push_str(&format!("[{}] {}\n", i + 1, url));
    }
    references
}

fn first_paragraph(content: &str) -> &str {
    content.split("\n\n").next().unwrap_or(content)
}

fn paragraphs_after_first(content: &str) -> String {
    content
        .split("\n\n")
        .skip(1)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lay `content` out as a scientific article with a fresh stamp
pub fn structure(content: &str, query: &str, citations: &[String]) -> String {
    structure_with(content, query, citations, &ArticleStamp::generate())
}

/// Lay `content` out as a scientific article.
///
/// Content that already has headings is kept verbatim after the generated
/// title and metadata. Otherwise it is arranged into Abstract, Introduction
/// and Conclusion sections.
pub fn structure_with(
    content: &str,
    query: &str,
    citations: &[String],
    stamp: &ArticleStamp,
) -> String {
    let mut article = format!(
        "{}\n\n{}\n\n",
        title_line(query),
        metadata_block(stamp, citations.len())
    );

    if has_heading_structure(content) {
        article.push_str(content);
        article.push_str("\n\n");
    } else {
        let sections = extract_sections(content);

        let summary = sections
            .get(INTRODUCTION)
            .unwrap_or_else(|| first_paragraph(content));
        article.push_str(&format!("{}\n\n{}\n\n", ABSTRACT_HEADING, summary));

        article.push_str(&format!(
            "{}\n\n{}\n\n",
            INTRODUCTION_HEADING,
            paragraphs_after_first(content)
        ));

        let has_conclusion = sections
            .titles()
            .any(|title| title.to_lowercase().starts_with("conclu"));
        if !has_conclusion {
            article.push_str(&format!("{}\n\n{}\n\n", CONCLUSION_HEADING, CONCLUSION_TEXT));
        }
    }

    article.push_str(&format_citations(citations));
    article
}
