//! HTML tag stripping.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::component::{component_id, Component};
use crate::models::Params;
use crate::pipeline::Env;
use crate::stream::{map_documents, DocStream};

static HIDDEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->")
        .expect("valid regex")
});
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(?:p|br|div|li|ul|ol|h[1-6]|tr|td|th|table|section|article|header|footer|blockquote)\b[^>]*>",
    )
    .expect("valid regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));
static SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

pub struct HtmlStrip {
    id: String,
}

impl HtmlStrip {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for HtmlStrip {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for HtmlStrip {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Strip HTML tags"
    }

    fn description(&self) -> &str {
        "Strips HTML tags, leaving only plain text."
    }

    async fn transform(&self, content: DocStream, _env: &Env, _params: &Params) -> Result<DocStream> {
        Ok(map_documents(content, "html", |doc| {
            Ok(doc.with_text(strip_tags(&doc.text)))
        }))
    }
}

/// Plain text of an HTML fragment, whitespace collapsed.
pub fn strip_tags(html: &str) -> String {
    let text = HIDDEN.replace_all(html, " ");
    let text = BLOCK_TAG.replace_all(&text, " ");
    let text = TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &Captures| decode_entity(&caps[0], &caps[1]));
    SPACE.replace_all(&text, " ").trim().to_string()
}

fn decode_entity(whole: &str, name: &str) -> String {
    let decoded = if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse().ok(),
        };
        code.and_then(char::from_u32)
    } else {
        match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            "ndash" => Some('–'),
            "mdash" => Some('—'),
            "hellip" => Some('…'),
            "euro" => Some('€'),
            "pound" => Some('£'),
            "copy" => Some('©'),
            _ => None,
        }
    };
    decoded.map(String::from).unwrap_or_else(|| whole.to_string())
}
