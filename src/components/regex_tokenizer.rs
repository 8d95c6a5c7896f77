//! Tokenizer driven by a user-supplied regular expression.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::component::{component_id, Component, ParamKind, ParamSpec};
use crate::error::PipelineError;
use crate::models::Params;
use crate::pipeline::Env;
use crate::stream::{map_documents, DocStream};

/// Words and single punctuation marks; suited to tokenizing source code.
pub const DEFAULT_PATTERN: &str = r##"[\w']+|[""!"#$%&'()*+,\-./:;<=>?@\[\]^_`{|}~""\\]"##;

pub struct RegexTokenizer {
    id: String,
}

impl RegexTokenizer {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for RegexTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for RegexTokenizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Regex based tokenizer"
    }

    fn schema(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("regex", "Regular expression", ParamKind::Str, DEFAULT_PATTERN)]
    }

    async fn transform(&self, content: DocStream, env: &Env, params: &Params) -> Result<DocStream> {
        let pattern = params
            .get("regex")
            .or_else(|| params.get("pattern"))
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PATTERN);
        let re = Regex::new(pattern).map_err(|e| PipelineError::InvalidStep {
            step_id: env.step_id.clone(),
            message: format!("invalid regex: {}", e),
        })?;

        Ok(map_documents(content, "regex_tokenizer", move |doc| {
            let tokens: Vec<&str> = re.find_iter(&doc.text).map(|m| m.as_str()).collect();
            Ok(doc.with_text(tokens.join(" ")))
        }))
    }
}
