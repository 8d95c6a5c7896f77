//! Core data models used throughout the corpus pipeline.
//!
//! These types represent the documents, pipeline steps, and corpus metadata
//! that flow between the source reader, the processing components, and the
//! on-disk corpus store.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::PipelineError;

/// Auxiliary columns carried alongside a document's text.
///
/// Insertion order is preserved (`serde_json` is built with `preserve_order`)
/// so metadata round-trips through the corpus store unchanged.
pub type Metadata = serde_json::Map<String, Value>;

/// One logical record derived from one input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    #[serde(default, deserialize_with = "metadata_or_null")]
    pub metadata: Metadata,
}

impl Document {
    /// A document with no metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// A copy of this document with new text and the same metadata.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: self.metadata.clone(),
        }
    }
}

fn metadata_or_null<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

/// A scalar step parameter, as submitted by a form or stored in a pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// JSON form used for hashing. Never fails: non-finite floats become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::from(*i),
            ParamValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ParamValue::Str(s) => Value::String(s.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view. Form submissions arrive as strings, so numeric strings
    /// are accepted too.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ParamValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Int(i) => Some(*i != 0),
            ParamValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Some(true),
                "false" | "off" | "no" | "0" | "" => Some(false),
                _ => None,
            },
            ParamValue::Float(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Step parameters. Keys are kept sorted, so insertion order never matters.
pub type Params = BTreeMap<String, ParamValue>;

/// One component invocation inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Registered component id.
    #[serde(alias = "component_id")]
    pub component: String,
    /// Unique instance id within the pipeline.
    pub step_id: String,
    #[serde(default)]
    pub params: Params,
}

impl Step {
    pub fn new(component: impl Into<String>, step_id: impl Into<String>, params: Params) -> Self {
        Self {
            component: component.into(),
            step_id: step_id.into(),
            params,
        }
    }
}

/// Reject pipelines that reuse a step id.
pub fn validate_pipeline(pipeline: &[Step]) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for step in pipeline {
        if !seen.insert(step.step_id.as_str()) {
            return Err(PipelineError::DuplicateStepId(step.step_id.clone()));
        }
    }
    Ok(())
}

/// Aggregate statistics gathered while a corpus is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub docs: u64,
    pub lang: String,
}

/// Contents of a corpus `<corpus_id>_info.json` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusInfo {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub statistics: Statistics,
    pub text_column: String,
    #[serde(default)]
    pub kw: serde_json::Map<String, Value>,
}
