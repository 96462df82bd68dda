//! Markdown section extraction.
//!
//! Splits a response into heading-delimited sections with a two-state
//! machine: text seen before any heading belongs to a synthetic
//! "Introduction" section, and every heading (levels 1 to 3) opens a new
//! section. Bodies are flushed when the next heading arrives or the input
//! ends.

use std::sync::LazyLock;

use regex::Regex;

/// Title given to text that precedes the first heading
pub const INTRODUCTION: &str = "Introduction";

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,3}\s+(.*)$").expect("heading pattern compiles"));

/// Title of a level 1-3 markdown heading line, trimmed
pub fn heading_title(line: &str) -> Option<&str> {
    HEADING
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

pub fn is_heading(line: &str) -> bool {
    HEADING.is_match(line)
}

/// True when any line of `text` is a level 1-3 heading
pub fn has_heading_structure(text: &str) -> bool {
    text.split('\n').any(is_heading)
}

/// Section title to body, iterated in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionMap {
    entries: Vec<(String, String)>,
}

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, title: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, body)| body.as_str())
    }

    pub fn contains(&self, title: &str) -> bool {
        self.get(title).is_some()
    }

    /// Set the body for `title`, keeping its original position if it was
    /// already present
    pub fn insert(&mut self, title: impl Into<String>, body: impl Into<String>) {
        let title = title.into();
        let body = body.into();
        match self.entries.iter_mut().find(|(t, _)| *t == title) {
            Some(entry) => entry.1 = body,
            None => self.entries.push((title, body)),
        }
    }

    /// Add `title` with an empty body unless it is already present
    fn register(&mut self, title: &str) {
        if !self.contains(title) {
            self.entries.push((title.to_string(), String::new()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, b)| (t.as_str(), b.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractState {
    BeforeFirstHeading,
    InSection(String),
}

/// Line-by-line section extractor
#[derive(Debug)]
pub struct SectionExtractor<'a> {
    state: ExtractState,
    buffer: Vec<&'a str>,
    sections: SectionMap,
}

impl<'a> Default for SectionExtractor<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SectionExtractor<'a> {
    pub fn new() -> Self {
        Self {
            state: ExtractState::BeforeFirstHeading,
            buffer: Vec::new(),
            sections: SectionMap::new(),
        }
    }

    pub fn state(&self) -> &ExtractState {
        &self.state
    }

    /// Lines accumulated since the last flush
    pub fn pending_lines(&self) -> usize {
        self.buffer.len()
    }

    pub fn sections(&self) -> &SectionMap {
        &self.sections
    }

    pub fn feed(&mut self, line: &'a str) {
        match heading_title(line) {
            Some(title) => {
                self.flush();
                self.sections.register(title);
                self.state = ExtractState::InSection(title.to_string());
            }
            None => self.buffer.push(line),
        }
    }

    pub fn finish(mut self) -> SectionMap {
        self.flush();
        self.sections
    }

    // A section only gets a body if at least one line (blank ones included)
    // was seen for it; a later body for a repeated title replaces the
    // earlier one.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let title = match &self.state {
            ExtractState::BeforeFirstHeading => INTRODUCTION,
            ExtractState::InSection(title) => title.as_str(),
        };
        let body = self.buffer.join("\n").trim().to_string();
        self.sections.insert(title, body);
        self.buffer.clear();
    }
}

/// Split `text` into sections keyed by heading title
pub fn extract_sections(text: &str) -> SectionMap {
    if text.trim().is_empty() {
        let mut sections = SectionMap::new();
        sections.insert(INTRODUCTION, "");
        return sections;
    }

    let mut extractor = SectionExtractor::new();
    for line in text.split('\n') {
        extractor.feed(line);
    }
    extractor.finish()
}
