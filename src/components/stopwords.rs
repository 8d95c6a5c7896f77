//! English stop word removal.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::component::{component_id, Component};
use crate::models::Params;
use crate::pipeline::Env;
use crate::stream::{join_sentences, map_documents, tokenized_text, DocStream};

const ENGLISH: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| ENGLISH.iter().copied().collect());

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

pub struct StopWords {
    id: String,
}

impl StopWords {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for StopWords {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for StopWords {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Remove stop words"
    }

    fn description(&self) -> &str {
        "Filter out common English stopwords"
    }

    async fn transform(&self, content: DocStream, _env: &Env, _params: &Params) -> Result<DocStream> {
        Ok(map_documents(content, "stopwords", |doc| {
            Ok(doc.with_text(remove_stopwords(&doc.text)))
        }))
    }
}

/// Drop stop words sentence by sentence; sentences are re-joined with `". "`.
pub fn remove_stopwords(text: &str) -> String {
    let sentences: Vec<Vec<String>> = tokenized_text(text)
        .into_iter()
        .map(|sentence| {
            sentence
                .into_iter()
                .filter(|w| !is_stopword(w))
                .collect::<Vec<_>>()
        })
        .filter(|s| !s.is_empty())
        .collect();
    join_sentences(&sentences)
}
