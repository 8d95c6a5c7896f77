//! Bigram collocation model.
//!
//! Counts unigrams and adjacent word pairs over tokenized sentences, scores
//! each pair, and merges pairs scoring above a threshold into a single token
//! joined with `_`. Applying the model to its own output and training again
//! yields trigrams, quadgrams, and so on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::storage::write_atomic;

pub const DELIMITER: &str = "_";

/// Pair scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scoring {
    /// `(count(ab) - min_count) / (count(a) * count(b)) * vocab_size`
    Default,
    /// Normalized pointwise mutual information, in `[-1, 1]`.
    Npmi,
}

impl Scoring {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Scoring::Default),
            "npmi" => Some(Scoring::Npmi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseModel {
    pub min_count: u64,
    pub threshold: f64,
    pub scoring: Scoring,
    pub delimiter: String,
    /// Total number of tokens seen during training.
    pub corpus_word_count: u64,
    /// Distinct unigrams plus distinct bigrams, fixed at train time.
    pub vocab_size: u64,
    pub unigrams: BTreeMap<String, u64>,
    /// `bigrams[a][b]` counts `a` immediately followed by `b`.
    pub bigrams: BTreeMap<String, BTreeMap<String, u64>>,
}

impl PhraseModel {
    /// Train on every sentence yielded by `sentences`.
    pub fn train<'a, I>(sentences: I, min_count: u64, threshold: f64, scoring: Scoring) -> Self
    where
        I: IntoIterator<Item = &'a Vec<String>>,
    {
        let mut unigrams: BTreeMap<String, u64> = BTreeMap::new();
        let mut bigrams: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        let mut corpus_word_count = 0u64;

        for sentence in sentences {
            for word in sentence {
                *unigrams.entry(word.clone()).or_default() += 1;
                corpus_word_count += 1;
            }
            for pair in sentence.windows(2) {
                *bigrams
                    .entry(pair[0].clone())
                    .or_default()
                    .entry(pair[1].clone())
                    .or_default() += 1;
            }
        }

        let vocab_size =
            (unigrams.len() + bigrams.values().map(|m| m.len()).sum::<usize>()) as u64;

        Self {
            min_count,
            threshold,
            scoring,
            delimiter: DELIMITER.to_string(),
            corpus_word_count,
            vocab_size,
            unigrams,
            bigrams,
        }
    }

    /// Every unigram, and every bigram joined with the delimiter.
    pub fn vocab(&self) -> Vec<String> {
        let mut out: Vec<String> = self.unigrams.keys().cloned().collect();
        for (a, followers) in &self.bigrams {
            for b in followers.keys() {
                out.push(format!("{}{}{}", a, self.delimiter, b));
            }
        }
        out
    }

    fn bigram_count(&self, a: &str, b: &str) -> u64 {
        self.bigrams
            .get(a)
            .and_then(|m| m.get(b))
            .copied()
            .unwrap_or(0)
    }

    /// Score of the pair `a b`, or `None` when it is too rare to be a phrase.
    pub fn score(&self, a: &str, b: &str) -> Option<f64> {
        let ab = self.bigram_count(a, b);
        if ab == 0 || ab < self.min_count {
            return None;
        }
        let ca = *self.unigrams.get(a)? as f64;
        let cb = *self.unigrams.get(b)? as f64;
        let ab = ab as f64;

        match self.scoring {
            Scoring::Default => {
                Some((ab - self.min_count as f64) / (ca * cb) * self.vocab_size as f64)
            }
            Scoring::Npmi => {
                let n = self.corpus_word_count as f64;
                let pa = ca / n;
                let pb = cb / n;
                let pab = ab / n;
                if pab >= 1.0 {
                    return Some(1.0);
                }
                Some((pab / (pa * pb)).ln() / -pab.ln())
            }
        }
    }

    /// Merge phrases in one sentence, scanning left to right.
    pub fn apply(&self, sentence: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(sentence.len());
        let mut i = 0;
        while i < sentence.len() {
            if i + 1 < sentence.len() {
                let (a, b) = (&sentence[i], &sentence[i + 1]);
                if self.score(a, b).is_some_and(|s| s > self.threshold) {
                    out.push(format!("{}{}{}", a, self.delimiter, b));
                    i += 2;
                    continue;
                }
            }
            out.push(sentence[i].clone());
            i += 1;
        }
        out
    }

    /// Persist atomically: readers see either no file or the whole model.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        write_atomic(path, &bytes)
            .with_context(|| format!("Failed to save phrase model: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read phrase model: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt phrase model: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(texts: &[&str]) -> Vec<Vec<String>> {
        texts
            .iter()
            .map(|t| t.split_whitespace().map(String::from).collect())
            .collect()
    }

    fn corpus() -> Vec<Vec<String>> {
        let mut s = Vec::new();
        for _ in 0..6 {
            s.extend(sentences(&[
                "air pollution harms cities",
                "reduce air pollution now",
                "rivers and lakes",
            ]));
        }
        s
    }

    #[test]
    fn merges_frequent_pairs() {
        let model = PhraseModel::train(&corpus(), 5, 0.5, Scoring::Default);
        let out = model.apply(&sentences(&["we breathe air pollution daily"])[0]);
        assert_eq!(out, vec!["we", "breathe", "air_pollution", "daily"]);
    }

    #[test]
    fn rare_pairs_stay_apart() {
        let model = PhraseModel::train(&corpus(), 20, 0.0, Scoring::Default);
        assert_eq!(model.score("air", "pollution"), None);
        let input = sentences(&["air pollution"]).remove(0);
        assert_eq!(model.apply(&input), input);
    }

    #[test]
    fn threshold_is_strict() {
        let model = PhraseModel::train(&corpus(), 5, 0.0, Scoring::Default);
        let score = model.score("air", "pollution").unwrap();
        let strict = PhraseModel {
            threshold: score,
            ..model.clone()
        };
        let input = sentences(&["air pollution"]).remove(0);
        assert_eq!(strict.apply(&input), input);
    }

    #[test]
    fn npmi_is_bounded() {
        let model = PhraseModel::train(&corpus(), 1, 0.0, Scoring::Npmi);
        let s = model.score("air", "pollution").unwrap();
        assert!(s > 0.0 && s <= 1.0 + 1e-9, "npmi out of range: {}", s);
    }

    #[test]
    fn vocab_lists_joined_bigrams() {
        let model = PhraseModel::train(&corpus(), 1, 0.0, Scoring::Default);
        let vocab = model.vocab();
        assert!(vocab.contains(&"air".to_string()));
        assert!(vocab.contains(&"air_pollution".to_string()));
        assert_eq!(vocab.len() as u64, model.vocab_size);
    }

    #[test]
    fn apply_cost_does_not_grow_with_vocabulary() {
        let mut training = corpus();
        for i in 0..50_000 {
            let pair = vec![format!("w{}", i), format!("v{}", i)];
            training.push(pair.clone());
            training.push(pair);
        }
        let model = PhraseModel::train(&training, 1, 0.0, Scoring::Default);
        assert!(model.vocab_size > 150_000);

        let sentence: Vec<String> = (0..20_000)
            .flat_map(|i| [format!("w{}", i), format!("v{}", i)])
            .collect();
        let started = std::time::Instant::now();
        let out = model.apply(&sentence);
        assert_eq!(out.len(), 20_000);
        assert_eq!(out[0], "w0_v0");
        assert!(
            started.elapsed() < std::time::Duration::from_secs(10),
            "apply took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.phras.2");
        let model = PhraseModel::train(&corpus(), 5, 0.5, Scoring::Npmi);
        model.save(&path).unwrap();
        assert_eq!(PhraseModel::load(&path).unwrap(), model);

        std::fs::write(&path, b"{\"min_count\": 5, \"thr").unwrap();
        assert!(PhraseModel::load(&path).is_err());
    }
}
