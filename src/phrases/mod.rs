//! Phrase detection with cached, multi-level collocation models.
//!
//! Detecting phrases such as `air_pollution` needs statistics over the whole
//! corpus, which a preview of a few rows cannot provide. The phrase step
//! therefore either replays models already trained for its pipeline hash,
//! schedules a background build (preview), or trains inline (produce).
//!
//! - [`model`]: the collocation model (train, apply, persist).
//! - [`cache`]: artifact discovery, multi-level build, and replay.
//! - [`component`]: the [`PhraseFinder`](component::PhraseFinder) pipeline step.

pub mod cache;
pub mod component;
pub mod model;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::component::{Component, ParamsExt};
use crate::coordinator::JobCoordinator;
use crate::models::{Params, Step};
use crate::phash::phash;
use crate::storage::Storage;

pub use component::PhraseFinder;
pub use model::{PhraseModel, Scoring};

/// What the phrase step emits for each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhraseMode {
    /// Replace the text with its phrase-tokenized form.
    Tokenize,
    /// Keep the text and append the phrases found in it.
    Append,
    /// Replace the text with just the phrases found in it.
    Replace,
}

impl PhraseMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tokenize" => Some(PhraseMode::Tokenize),
            "append" => Some(PhraseMode::Append),
            "replace" => Some(PhraseMode::Replace),
            _ => None,
        }
    }
}

/// Parameters of the phrase step that govern training and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseSettings {
    pub mode: PhraseMode,
    pub level: u32,
    pub min_count: u64,
    pub threshold: f64,
    pub scoring: Scoring,
}

pub const MIN_LEVEL: u32 = 2;
pub const MAX_LEVEL: u32 = 4;

impl Default for PhraseSettings {
    fn default() -> Self {
        Self {
            mode: PhraseMode::Tokenize,
            level: 2,
            min_count: 5,
            threshold: 10.0,
            scoring: Scoring::Default,
        }
    }
}

impl PhraseSettings {
    /// Read settings from step parameters. Missing keys take defaults,
    /// unknown keys are ignored, out-of-range values are rejected.
    pub fn from_params(params: &Params) -> Result<Self, String> {
        let defaults = Self::default();

        let mode = params.str_or("mode", "tokenize");
        let mode = PhraseMode::parse(&mode).ok_or_else(|| format!("unknown mode '{}'", mode))?;

        let level = params.int_or("level", defaults.level as i64);
        if level < MIN_LEVEL as i64 || level > MAX_LEVEL as i64 {
            return Err(format!(
                "level must be between {} and {}, got {}",
                MIN_LEVEL, MAX_LEVEL, level
            ));
        }

        let min_count = params.int_or("min_count", defaults.min_count as i64);
        if min_count < 1 {
            return Err(format!("min_count must be >= 1, got {}", min_count));
        }

        let scoring = params.str_or("scoring", "default");
        let scoring =
            Scoring::parse(&scoring).ok_or_else(|| format!("unknown scoring '{}'", scoring))?;

        Ok(Self {
            mode,
            level: level as u32,
            min_count: min_count as u64,
            threshold: params.float_or("threshold", defaults.threshold),
            scoring,
        })
    }
}

/// Availability of phrase models for a pipeline hash.
///
/// `OK` once the model chain is complete: every level `2..=level` when the
/// step's `level` is known, otherwise a gapless chain from level 2 with no
/// build still in flight. `preview_<status>` while a job for `phash` is
/// queued or running, otherwise `unavailable`.
pub async fn phrase_model_status(
    storage: &Storage,
    jobs: &JobCoordinator,
    phash: &str,
    level: Option<u32>,
) -> String {
    let levels = artifact_levels(storage, phash);
    let complete = match level {
        Some(level) => (MIN_LEVEL..=level).all(|l| levels.contains(&l)),
        None => levels.first() == Some(&MIN_LEVEL) && levels.windows(2).all(|w| w[1] == w[0] + 1),
    };
    if complete && level.is_some() {
        return "OK".to_string();
    }

    match jobs.get_job_for(phash).await {
        Some(job) => format!("preview_{}", job.status),
        None if complete => "OK".to_string(),
        None => "unavailable".to_string(),
    }
}

/// Levels of every artifact for `phash` anywhere under the storage tree.
fn artifact_levels(storage: &Storage, phash: &str) -> Vec<u32> {
    let prefix = cache::artifact_prefix(phash);
    let mut levels: Vec<u32> = WalkDir::new(storage.var_root())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.file_name().to_str()?.strip_prefix(&prefix)?.parse().ok())
        .collect();
    levels.sort_unstable();
    levels.dedup();
    levels
}

/// A phrase step located in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseStep {
    pub step_id: String,
    pub phash: String,
    /// `None` when the step parameters are invalid.
    pub level: Option<u32>,
}

/// Every phrase step in `pipeline`, in order, hashed over its prefix.
pub fn phrase_steps(file_name: &str, text_column: &str, pipeline: &[Step]) -> Vec<PhraseStep> {
    let finder = PhraseFinder::new();
    pipeline
        .iter()
        .enumerate()
        .filter(|(_, step)| step.component == finder.id())
        .map(|(i, step)| PhraseStep {
            step_id: step.step_id.clone(),
            phash: phash(file_name, text_column, &pipeline[..=i]),
            level: PhraseSettings::from_params(&step.params).ok().map(|s| s.level),
        })
        .collect()
}
