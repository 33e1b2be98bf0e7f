//! Review payloads and message formatting.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A comment on one line of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineComment {
    pub line: u32,
    pub message: String,
}

/// Body of a `set review` request.
///
/// Serializes with keys in sorted order and leaves out empty sections, so
/// an empty review is `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GerritReview {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    comments: BTreeMap<String, Vec<InlineComment>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    message: String,
}

impl GerritReview {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.set_message(message);
        self
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Set a label score, replacing any earlier score for the label.
    pub fn add_label(&mut self, label: impl Into<String>, score: i32) {
        self.labels.insert(label.into(), score);
    }

    pub fn add_labels<I, S>(&mut self, labels: I)
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        for (label, score) in labels {
            self.add_label(label, score);
        }
    }

    pub fn add_comment(&mut self, file: impl Into<String>, line: u32, message: impl Into<String>) {
        self.comments
            .entry(file.into())
            .or_default()
            .push(InlineComment {
                line,
                message: message.into(),
            });
    }

    pub fn add_comments<I, F, M>(&mut self, comments: I)
    where
        I: IntoIterator<Item = (F, u32, M)>,
        F: Into<String>,
        M: Into<String>,
    {
        for (file, line, message) in comments {
            self.add_comment(file, line, message);
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, i32> {
        &self.labels
    }

    #[must_use]
    pub fn comments(&self) -> &BTreeMap<String, Vec<InlineComment>> {
        &self.comments
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl fmt::Display for GerritReview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Builds review messages out of paragraphs and bullet lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewMessageFormatter {
    header: Option<String>,
    footer: Option<String>,
    paragraphs: Vec<String>,
}

impl ReviewMessageFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text placed before the paragraphs.
    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Text placed after the paragraphs.
    #[must_use]
    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    /// Add a text paragraph. Blank text is ignored.
    pub fn append_text(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.paragraphs.push(text.to_string());
        }
    }

    /// Add a bullet list, one `* item` per line.
    ///
    /// Items are flattened to a single line and stripped of any bullet
    /// marker they already carry. A list with no non-blank items is ignored.
    pub fn append_list<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bullets: Vec<String> = items
            .into_iter()
            .filter_map(|item| {
                let flat = item.as_ref().replace('\n', " ");
                let text = flat.trim().trim_start_matches('*').trim();
                (!text.is_empty()).then(|| format!("* {text}"))
            })
            .collect();

        if !bullets.is_empty() {
            self.paragraphs.push(bullets.join("\n"));
        }
    }

    /// True when no paragraph has been added, regardless of header/footer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    /// The formatted message; empty when there are no paragraphs.
    #[must_use]
    pub fn format(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut parts: Vec<&str> = Vec::with_capacity(self.paragraphs.len() + 2);
        if let Some(header) = self.header.as_deref().map(str::trim) {
            parts.push(header);
        }
        parts.extend(self.paragraphs.iter().map(String::as_str));
        if let Some(footer) = self.footer.as_deref().map(str::trim) {
            parts.push(footer);
        }
        parts.join("\n\n")
    }
}
