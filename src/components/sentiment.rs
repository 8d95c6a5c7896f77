//! Sentiment-based document filter.
//!
//! Polarity is lexicon based: the share of positive over negative opinion
//! words, scaled to `[-1, 1]`. A text with no opinion words scores 0.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::component::{component_id, Component, ParamKind, ParamSpec, ParamsExt};
use crate::models::Params;
use crate::pipeline::Env;
use crate::stream::{tokenized_text, DocStream};

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "positive", "improve", "improved", "improvement", "improving",
    "benefit", "benefits", "beneficial", "success", "successful", "clean", "cleaner", "healthy",
    "better", "best", "progress", "protect", "protected", "protection", "recover", "recovery",
    "sustainable", "efficient", "safe", "gain", "gains", "increase", "restored", "thriving",
    "favourable", "favorable", "effective", "achieve", "achieved", "opportunity", "support",
];

const NEGATIVE: &[&str] = &[
    "bad", "poor", "worse", "worst", "negative", "decline", "declining", "decrease", "damage",
    "damaged", "harm", "harmful", "pollution", "polluted", "loss", "losses", "threat",
    "threatened", "risk", "risks", "stress", "degradation", "degraded", "failure", "fail",
    "failed", "toxic", "dangerous", "unsafe", "contaminated", "contamination", "problem",
    "problems", "crisis", "drought", "scarcity", "deterioration", "critical", "unsustainable",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "without", "hardly", "nor"];

static POS: Lazy<HashSet<&'static str>> = Lazy::new(|| POSITIVE.iter().copied().collect());
static NEG: Lazy<HashSet<&'static str>> = Lazy::new(|| NEGATIVE.iter().copied().collect());
static NOT: Lazy<HashSet<&'static str>> = Lazy::new(|| NEGATIONS.iter().copied().collect());

/// Polarity in `[-1, 1]`. A negation flips the next opinion word in its sentence.
pub fn polarity(text: &str) -> f64 {
    let (mut pos, mut neg) = (0u32, 0u32);
    for sentence in tokenized_text(&text.to_lowercase()) {
        let mut negated = false;
        for word in &sentence {
            let w = word.as_str();
            if NOT.contains(w) || w.ends_with("n't") {
                negated = true;
                continue;
            }
            let hit = if POS.contains(w) {
                Some(true)
            } else if NEG.contains(w) {
                Some(false)
            } else {
                None
            };
            if let Some(positive) = hit {
                if positive != negated {
                    pos += 1;
                } else {
                    neg += 1;
                }
                negated = false;
            }
        }
    }
    if pos + neg == 0 {
        return 0.0;
    }
    (pos as f64 - neg as f64) / (pos + neg) as f64
}

pub struct SentimentFilter {
    id: String,
}

impl SentimentFilter {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for SentimentFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for SentimentFilter {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Sentiment-based filter"
    }

    fn description(&self) -> &str {
        "Filter documents based on their sentiment value"
    }

    fn schema(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("threshold", "Minimum sentiment", ParamKind::Float, 0.5f64)
            .describe("Keep documents scoring strictly above this, between -1 and 1")]
    }

    async fn transform(&self, content: DocStream, _env: &Env, params: &Params) -> Result<DocStream> {
        let threshold = params.float_or("threshold", 0.5);
        Ok(Box::new(content.filter(move |doc| polarity(&doc.text) > threshold)))
    }
}
