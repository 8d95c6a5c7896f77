//! Phrase model artifacts on disk.
//!
//! A build for pipeline hash `P` at level `L` leaves one model per level in
//! the file's working directory: `P.phras.2`, `P.phras.3`, ..., `P.phras.L`.
//! Level `n` is trained on the output of levels `2..n`, so replay must apply
//! the models in level order.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::model::PhraseModel;
use super::{PhraseMode, PhraseSettings, MIN_LEVEL};
use crate::models::Document;
use crate::stream::{join_sentences, tokenized_text, DocStream};

/// Tokenized sentences of one document.
pub type Sentences = Vec<Vec<String>>;

pub fn artifact_prefix(phash: &str) -> String {
    format!("{}.phras.", phash)
}

pub fn model_path(dir: &Path, phash: &str, level: u32) -> PathBuf {
    dir.join(format!("{}{}", artifact_prefix(phash), level))
}

/// Artifacts for `phash` in `dir`, sorted by level.
pub fn phrase_model_files(dir: &Path, phash: &str) -> Vec<(u32, PathBuf)> {
    let prefix = artifact_prefix(phash);
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let level: u32 = name.strip_prefix(&prefix)?.parse().ok()?;
            (level >= MIN_LEVEL).then(|| (level, e.path()))
        })
        .collect();
    files.sort_by_key(|(level, _)| *level);
    files
}

/// Load the complete model chain `2..=level` for `phash`.
///
/// Returns `None` when any level is missing or unreadable; a broken
/// artifact is logged and treated as a cache miss.
pub fn cached_models(dir: &Path, phash: &str, level: u32) -> Option<Vec<PhraseModel>> {
    let files = phrase_model_files(dir, phash);
    let mut models = Vec::new();
    for want in MIN_LEVEL..=level {
        let (_, path) = files.iter().find(|(l, _)| *l == want)?;
        match PhraseModel::load(path) {
            Ok(model) => models.push(model),
            Err(e) => {
                tracing::warn!(phash, level = want, error = %e, "ignoring unusable phrase model");
                return None;
            }
        }
    }
    Some(models)
}

/// Train and persist one model per level, each on the previous level's output.
///
/// The tokenized corpus is held in memory and reused for every pass.
/// Returns the models and the corpus as transformed by all of them.
pub fn build_phrase_models(
    corpus: Vec<Sentences>,
    dir: &Path,
    phash: &str,
    settings: &PhraseSettings,
) -> Result<(Vec<PhraseModel>, Vec<Sentences>)> {
    let mut current = corpus;
    let mut models = Vec::new();
    for level in MIN_LEVEL..=settings.level {
        let model = PhraseModel::train(
            current.iter().flatten(),
            settings.min_count,
            settings.threshold,
            settings.scoring,
        );
        let path = model_path(dir, phash, level);
        model.save(&path)?;
        tracing::info!(phash, level, path = %path.display(), "saved phrase model");

        current = current
            .iter()
            .map(|doc| doc.iter().map(|s| model.apply(s)).collect())
            .collect();
        models.push(model);
    }
    Ok((models, current))
}

/// Apply `models` in order to one document's sentences.
pub fn apply_models(models: &[PhraseModel], sentences: &Sentences) -> Sentences {
    let mut current = sentences.clone();
    for model in models {
        current = current.iter().map(|s| model.apply(s)).collect();
    }
    current
}

/// Render a document from its original and phrase-merged sentences.
pub fn render(doc: &Document, original: &Sentences, merged: &Sentences, mode: PhraseMode) -> Document {
    match mode {
        PhraseMode::Tokenize => doc.with_text(join_sentences(merged)),
        PhraseMode::Append => {
            let phrases = found_phrases(original, merged);
            if phrases.is_empty() {
                doc.clone()
            } else {
                doc.with_text(format!("{} {}", doc.text, phrases.join(" ")))
            }
        }
        PhraseMode::Replace => doc.with_text(found_phrases(original, merged).join(" ")),
    }
}

/// Tokens created by merging, in order of appearance.
fn found_phrases(original: &Sentences, merged: &Sentences) -> Vec<String> {
    let known: std::collections::HashSet<&str> =
        original.iter().flatten().map(|w| w.as_str()).collect();
    merged
        .iter()
        .flatten()
        .filter(|w| w.contains(super::model::DELIMITER) && !known.contains(w.as_str()))
        .cloned()
        .collect()
}

/// Replay trained models over a document stream.
pub fn use_phrase_models(content: DocStream, models: Arc<Vec<PhraseModel>>, mode: PhraseMode) -> DocStream {
    Box::new(content.map(move |doc| {
        let original = tokenized_text(&doc.text);
        let merged = apply_models(&models, &original);
        render(&doc, &original, &merged, mode)
    }))
}
