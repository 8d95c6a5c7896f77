//! Alphabetic tokenizer that drops short words.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::component::{component_id, Component, ParamKind, ParamSpec, ParamsExt};
use crate::models::{ParamValue, Params};
use crate::pipeline::Env;
use crate::stream::{map_documents, DocStream};

static ALPHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\W\d_]+").expect("valid regex"));

pub struct SimpleTokenizer {
    id: String,
}

impl SimpleTokenizer {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for SimpleTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for SimpleTokenizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Simple text tokenization"
    }

    fn description(&self) -> &str {
        "Simple, dumb tokenizer. Strips non-alpha and small words"
    }

    fn schema(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "min_length",
            "Minimum word length",
            ParamKind::Int { min: Some(1) },
            ParamValue::Int(3),
        )]
    }

    async fn transform(&self, content: DocStream, _env: &Env, params: &Params) -> Result<DocStream> {
        let min_length = params.int_or("min_length", 3).max(1) as usize;
        Ok(map_documents(content, "simple_tokenizer", move |doc| {
            Ok(doc.with_text(tokenize(&doc.text, min_length).join(" ")))
        }))
    }
}

pub fn tokenize(text: &str, min_length: usize) -> Vec<String> {
    ALPHA
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() >= min_length)
        .map(String::from)
        .collect()
}
