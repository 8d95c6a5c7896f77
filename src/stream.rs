//! Content stream adapter.
//!
//! Pipeline steps exchange [`Document`]s through a lazy [`DocStream`]. Input
//! may arrive in looser shapes (a raw string, a list of word tokens, a JSON
//! value from a stored pipeline), and [`normalize`] folds all of them into the
//! canonical document form.
//!
//! This module also holds the shared sentence tokenization used by the
//! stopword and phrase components.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::PipelineError;
use crate::models::{Document, Metadata};

/// A lazy, pull-based sequence of documents.
pub type DocStream = Box<dyn Iterator<Item = Document> + Send>;

/// Any input shape accepted by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text(String),
    Tokens(Vec<String>),
    Doc(Document),
}

impl From<String> for ContentItem {
    fn from(s: String) -> Self {
        ContentItem::Text(s)
    }
}

impl From<&str> for ContentItem {
    fn from(s: &str) -> Self {
        ContentItem::Text(s.to_string())
    }
}

impl From<Vec<String>> for ContentItem {
    fn from(tokens: Vec<String>) -> Self {
        ContentItem::Tokens(tokens)
    }
}

impl From<Document> for ContentItem {
    fn from(doc: Document) -> Self {
        ContentItem::Doc(doc)
    }
}

/// Convert an input item into a [`Document`].
///
/// A document is returned as-is (moved, not copied); strings get empty
/// metadata; token lists are joined with single spaces.
pub fn normalize(item: impl Into<ContentItem>) -> Document {
    match item.into() {
        ContentItem::Doc(doc) => doc,
        ContentItem::Text(text) => Document::new(text),
        ContentItem::Tokens(tokens) => Document::new(tokens.join(" ")),
    }
}

/// Convert a JSON value into a [`Document`].
///
/// Accepts a string, an array of strings, or an object with a string `text`
/// field and an optional `metadata` object. Anything else is a contract
/// violation.
pub fn normalize_value(value: Value) -> Result<Document, PipelineError> {
    match value {
        Value::String(s) => Ok(Document::new(s)),
        Value::Array(items) => {
            let mut tokens = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => tokens.push(s),
                    other => {
                        return Err(PipelineError::UnsupportedInputKind(format!(
                            "token list containing {}",
                            kind_name(&other)
                        )))
                    }
                }
            }
            Ok(normalize(tokens))
        }
        Value::Object(mut map) => {
            let text = match map.remove("text") {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(PipelineError::UnsupportedInputKind(
                        "object without a string 'text' field".to_string(),
                    ))
                }
            };
            let metadata = match map.remove("metadata") {
                None | Some(Value::Null) => Metadata::new(),
                Some(Value::Object(md)) => md,
                Some(other) => {
                    return Err(PipelineError::UnsupportedInputKind(format!(
                        "metadata given as {}",
                        kind_name(&other)
                    )))
                }
            };
            Ok(Document::with_metadata(text, metadata))
        }
        other => Err(PipelineError::UnsupportedInputKind(
            kind_name(&other).to_string(),
        )),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Plain-text projection of an input item.
pub fn extract_text(item: &ContentItem) -> String {
    match item {
        ContentItem::Text(text) => text.clone(),
        ContentItem::Tokens(tokens) => tokens.join(" "),
        ContentItem::Doc(doc) => doc.text.clone(),
    }
}

/// Wrap any iterator of input items as a document stream.
pub fn to_stream<I, T>(items: I) -> DocStream
where
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    T: Into<ContentItem> + 'static,
{
    Box::new(items.into_iter().map(normalize))
}

/// Apply a fallible per-document transform.
///
/// A document whose transform fails is logged together with its content and
/// dropped from the output; the stream carries on with the next one.
pub fn map_documents<F>(content: DocStream, component: &'static str, mut f: F) -> DocStream
where
    F: FnMut(&Document) -> Result<Document> + Send + 'static,
{
    Box::new(content.filter_map(move |doc| match f(&doc) {
        Ok(out) => Some(out),
        Err(e) => {
            tracing::warn!(
                component,
                error = %e,
                content = %snippet(&doc.text),
                "skipping document that failed to process"
            );
            None
        }
    }))
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?;\n]+").expect("valid regex"));
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+(?:['-]\w+)*").expect("valid regex"));

/// Split text into sentences of word tokens. Empty sentences are dropped.
///
/// `_` counts as a word character, so phrase tokens such as `air_pollution`
/// survive re-tokenization intact.
pub fn tokenized_text(text: &str) -> Vec<Vec<String>> {
    SENTENCE_RE
        .find_iter(text)
        .map(|sentence| {
            WORD_RE
                .find_iter(sentence.as_str())
                .map(|w| w.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|words| !words.is_empty())
        .collect()
}

/// Inverse of [`tokenized_text`]: words joined by spaces, sentences by `". "`.
pub fn join_sentences(sentences: &[Vec<String>]) -> String {
    sentences
        .iter()
        .map(|s| s.join(" "))
        .collect::<Vec<_>>()
        .join(". ")
}
