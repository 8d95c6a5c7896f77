//! Truncate the stream after a fixed number of documents.

use anyhow::Result;
use async_trait::async_trait;

use crate::component::{component_id, Component, ParamKind, ParamSpec, ParamsExt};
use crate::models::{ParamValue, Params};
use crate::pipeline::Env;
use crate::stream::DocStream;

pub struct Limit {
    id: String,
}

impl Limit {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for Limit {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Limit number of results"
    }

    fn schema(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "max_count",
            "Results limit",
            ParamKind::Int { min: Some(0) },
            ParamValue::Int(0),
        )
        .describe("Set to 0 if you want unlimited results")]
    }

    async fn transform(&self, content: DocStream, _env: &Env, params: &Params) -> Result<DocStream> {
        let max = params.int_or("max_count", 0);
        if max <= 0 {
            return Ok(content);
        }
        Ok(Box::new(content.take(max as usize)))
    }
}
