use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::cache::{build_phrase_models, cached_models, render, use_phrase_models};
use super::PhraseSettings;
use crate::component::{component_id, Component, ParamKind, ParamSpec};
use crate::error::PipelineError;
use crate::jobs::{JobSpec, JobStatus};
use crate::models::{Document, ParamValue, Params};
use crate::pipeline::Env;
use crate::stream::{tokenized_text, DocStream};

/// Detects multi-word phrases and merges them into single tokens.
///
/// On a cache hit the stored models are replayed regardless of mode. On a
/// miss, a preview schedules a background build (once per pipeline hash)
/// and passes its input through untouched; a produce run waits for a build
/// that is already running, or trains inline.
pub struct PhraseFinder {
    id: String,
}

impl PhraseFinder {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for PhraseFinder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for PhraseFinder {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Find and process phrases"
    }

    fn description(&self) -> &str {
        "Detects collocated words across the whole corpus and joins them with '_'."
    }

    fn schema(&self) -> Vec<ParamSpec> {
        let choices = |values: &[(&str, &str)]| ParamKind::Choice {
            values: values
                .iter()
                .map(|(v, l)| (v.to_string(), l.to_string()))
                .collect(),
        };
        vec![
            ParamSpec::new(
                "mode",
                "Mode",
                choices(&[
                    ("tokenize", "Tokenize phrases in text"),
                    ("append", "Add phrases at the end of text"),
                    ("replace", "Replace all text with found phrases"),
                ]),
                "tokenize",
            ),
            ParamSpec::new(
                "level",
                "N-gram level",
                choices(&[
                    ("2", "Bigrams"),
                    ("3", "Trigrams"),
                    ("4", "Quadgrams"),
                ]),
                ParamValue::Int(2),
            )
            .describe("Maximum phrase length, in words"),
            ParamSpec::new(
                "min_count",
                "Minimum number",
                ParamKind::Int { min: Some(1) },
                ParamValue::Int(5),
            )
            .describe("Ignore all words and bigrams with total collected count lower than this."),
            ParamSpec::new("threshold", "Threshold", ParamKind::Float, 10.0f64)
                .describe("A phrase is formed when its score is higher than this."),
            ParamSpec::new(
                "scoring",
                "Scoring",
                choices(&[
                    ("default", "Default"),
                    ("npmi", "Normalized pointwise mutual information"),
                ]),
                "default",
            ),
        ]
    }

    async fn transform(&self, content: DocStream, env: &Env, params: &Params) -> Result<DocStream> {
        let settings = PhraseSettings::from_params(params).map_err(|message| {
            PipelineError::InvalidStep {
                step_id: env.step_id.clone(),
                message,
            }
        })?;
        let dir = env.cache_dir()?;

        if let Some(models) = cached_models(&dir, &env.phash, settings.level) {
            tracing::debug!(phash = %env.phash, "replaying cached phrase models");
            return Ok(use_phrase_models(content, Arc::new(models), settings.mode));
        }

        if env.preview_mode {
            match env.jobs.get_job_for(&env.phash).await {
                Some(job) => {
                    tracing::debug!(phash = %env.phash, job_id = %job.id, status = %job.status, "phrase models are being built");
                }
                None => {
                    let spec = JobSpec::BuildPhrases {
                        pipeline: env.prefix(),
                        file_name: env.file_name.clone(),
                        text_column: env.text_column.clone(),
                        phash: env.phash.clone(),
                        settings,
                    };
                    env.jobs.enqueue(&env.phash, spec).await;
                }
            }
            return Ok(content);
        }

        // Produce mode. Only a job that is already running is worth waiting
        // for; a queued one may be stuck behind this very job.
        if let Some(job) = env.jobs.get_job_for(&env.phash).await {
            if job.status == JobStatus::Started {
                let done = env
                    .jobs
                    .wait_for_completion(&env.phash, env.jobs.poll_interval(), env.jobs.wait_timeout())
                    .await;
                if done {
                    if let Some(models) = cached_models(&dir, &env.phash, settings.level) {
                        return Ok(use_phrase_models(content, Arc::new(models), settings.mode));
                    }
                }
            }
        }

        tracing::info!(phash = %env.phash, level = settings.level, "building phrase models inline");
        let phash = env.phash.clone();
        let docs = tokio::task::spawn_blocking(move || build_inline(content, &dir, &phash, &settings))
            .await??;
        Ok(Box::new(docs.into_iter()))
    }
}

/// Train on the whole stream, then render it with the freshly trained models.
fn build_inline(
    content: DocStream,
    dir: &std::path::Path,
    phash: &str,
    settings: &PhraseSettings,
) -> Result<Vec<Document>> {
    let docs: Vec<Document> = content.collect();
    let original: Vec<_> = docs.iter().map(|d| tokenized_text(&d.text)).collect();
    let (_, merged) = build_phrase_models(original.clone(), dir, phash, settings)?;
    Ok(docs
        .iter()
        .zip(original.iter().zip(merged.iter()))
        .map(|(doc, (orig, merged))| render(doc, orig, merged, settings.mode))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;
    use crate::config::QueueConfig;
    use crate::coordinator::JobCoordinator;
    use crate::jobs::{InMemoryQueue, TaskQueue};
    use crate::models::Step;
    use crate::phrases::cache::model_path;
    use crate::pipeline::{build_pipeline_from, PipelineContext};
    use crate::storage::Storage;
    use crate::stream::to_stream;

    fn texts() -> Vec<String> {
        (0..6)
            .map(|i| format!("water quality report {} water quality", i))
            .collect()
    }

    fn pipeline() -> Vec<Step> {
        let mut params = Params::new();
        params.insert("min_count".into(), ParamValue::Int(3));
        params.insert("threshold".into(), ParamValue::Float(0.1));
        vec![Step::new(PhraseFinder::new().id(), "phrases", params)]
    }

    fn context(root: &std::path::Path) -> (Arc<InMemoryQueue>, PipelineContext) {
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = PipelineContext::new(
            Arc::new(ComponentRegistry::with_builtins().unwrap()),
            Storage::new(root),
            JobCoordinator::new(queue.clone(), &QueueConfig::default()),
        );
        (queue, ctx)
    }

    async fn run(ctx: &PipelineContext, preview: bool) -> Vec<String> {
        build_pipeline_from(ctx, to_stream(texts()), "f.csv", "text", &pipeline(), preview)
            .await
            .unwrap()
            .map(|d| d.text)
            .collect()
    }

    #[tokio::test]
    async fn preview_without_cache_passes_through_and_schedules_once() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, ctx) = context(dir.path());

        assert_eq!(run(&ctx, true).await, texts());
        assert_eq!(run(&ctx, true).await, texts());

        let jobs = queue.snapshot();
        assert_eq!(jobs.len(), 1);
        match &jobs[0].spec {
            JobSpec::BuildPhrases { pipeline, phash, .. } => {
                assert_eq!(pipeline.len(), 1);
                assert_eq!(Some(phash.as_str()), jobs[0].phash());
            }
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn preview_survives_queue_outage() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, ctx) = context(dir.path());
        queue.set_available(false);
        assert_eq!(run(&ctx, true).await, texts());
    }

    #[tokio::test]
    async fn produce_builds_inline_then_preview_replays_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, ctx) = context(dir.path());

        let produced = run(&ctx, false).await;
        assert_eq!(produced[0], "water_quality report 0 water_quality");
        assert!(queue.snapshot().is_empty());

        let phash = crate::phash::phash("f.csv", "text", &pipeline());
        let base = ctx.storage.corpus_base_path("f.csv").unwrap();
        assert!(model_path(&base, &phash, 2).exists());

        let previewed = run(&ctx, true).await;
        assert_eq!(previewed, produced);
        assert!(queue.snapshot().is_empty());
    }

    #[tokio::test]
    async fn produce_does_not_wait_for_queued_job() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, ctx) = context(dir.path());
        run(&ctx, true).await;
        assert_eq!(queue.queued_jobs().await.unwrap().len(), 1);

        let produced = run(&ctx, false).await;
        assert_eq!(produced[1], "water_quality report 1 water_quality");
    }

    #[tokio::test]
    async fn invalid_settings_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ctx) = context(dir.path());
        let mut params = Params::new();
        params.insert("level".into(), ParamValue::Int(9));
        let pipeline = vec![Step::new(PhraseFinder::new().id(), "p", params)];
        let err = build_pipeline_from(&ctx, to_stream(texts()), "f.csv", "text", &pipeline, true)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidStep { .. })
        ));
    }
}
