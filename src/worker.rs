//! Background job worker.
//!
//! Pulls jobs off the shared queue one at a time and runs them to
//! completion. Each job runs under its own timeout; a job that errors or
//! times out is marked failed with the error message and the worker moves
//! on. Queued jobs older than the queue TTL are expired before every claim,
//! and so are started jobs past their timeout, whose worker has died.
//!
//! A timed-out job stops being awaited, but blocking training work it has
//! already handed to the thread pool runs to completion. Artifacts are named
//! by pipeline hash and written atomically, so a late write is the same model
//! a retry would produce.
//!
//! Several workers may share one queue: claiming is atomic, so each job
//! runs exactly once.

use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::corpus::{build_corpus, CorpusRequest};
use crate::jobs::{JobHandle, JobSpec};
use crate::models::Step;
use crate::phrases::cache::build_phrase_models;
use crate::phrases::PhraseSettings;
use crate::pipeline::{build_pipeline, PipelineContext};
use crate::progress::{NoProgress, ProgressReporter};
use crate::stream::tokenized_text;

pub struct Worker {
    ctx: PipelineContext,
    config: QueueConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl Worker {
    pub fn new(ctx: PipelineContext, config: &QueueConfig) -> Self {
        Self {
            ctx,
            config: config.clone(),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Process jobs until stopped. With `once`, return as soon as the queue
    /// is empty. Returns the number of jobs processed.
    pub async fn run(&self, once: bool) -> Result<usize> {
        tracing::info!(once, "worker started");
        let mut processed = 0;
        loop {
            match self.run_next().await {
                Ok(Some(_)) => processed += 1,
                Ok(None) if once => break,
                Ok(None) => tokio::time::sleep(self.config.poll_interval()).await,
                Err(e) if once => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "task queue unavailable, retrying");
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
            }
        }
        tracing::info!(processed, "worker stopped");
        Ok(processed)
    }

    /// Claim and run one job. `None` when nothing is queued.
    pub async fn run_next(&self) -> Result<Option<JobHandle>> {
        let queue = self.ctx.jobs.queue();
        self.expire_stale().await?;

        let Some(job) = queue.claim_next().await? else {
            return Ok(None);
        };
        tracing::info!(job_id = %job.id, kind = job.spec.kind(), "running job");

        let outcome = tokio::time::timeout(
            job.timeout(),
            run_job(&self.ctx, &job.spec, self.progress.clone()),
        )
        .await;
        match outcome {
            Ok(Ok(())) => {
                queue.mark_finished(&job.id).await?;
                tracing::info!(job_id = %job.id, "job finished");
            }
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                tracing::error!(job_id = %job.id, error = %message, "job failed");
                queue.mark_failed(&job.id, &message).await?;
            }
            Err(_) => {
                tracing::error!(
                    job_id = %job.id,
                    timeout_secs = job.timeout_secs,
                    "job timed out; blocking work already started may still finish"
                );
                queue.mark_failed(&job.id, "timed out").await?;
            }
        }
        Ok(Some(queue.fetch_job(&job.id).await?))
    }

    /// Fail queued jobs that waited longer than the queue TTL, and started
    /// jobs that outlived their timeout.
    pub async fn expire_stale(&self) -> Result<usize> {
        let queue = self.ctx.jobs.queue();
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(self.config.ttl_secs as i64);
        let expired = queue.expire_queued(cutoff).await?;
        if expired > 0 {
            tracing::warn!(expired, "expired stale queued jobs");
        }
        let abandoned = queue.expire_abandoned(now).await?;
        if abandoned > 0 {
            tracing::warn!(abandoned, "failed started jobs past their timeout");
        }
        Ok(expired + abandoned)
    }
}

/// Execute one job's work.
pub async fn run_job(
    ctx: &PipelineContext,
    spec: &JobSpec,
    progress: Arc<dyn ProgressReporter>,
) -> Result<()> {
    match spec {
        JobSpec::BuildPhrases {
            pipeline,
            file_name,
            text_column,
            phash,
            settings,
        } => build_phrases_job(ctx, pipeline, file_name, text_column, phash, settings).await,
        JobSpec::BuildCorpus {
            pipeline,
            corpus_id,
            file_name,
            text_column,
            title,
            description,
            kw,
        } => {
            let request = CorpusRequest {
                corpus_id: corpus_id.clone(),
                file_name: file_name.clone(),
                text_column: text_column.clone(),
                title: title.clone(),
                description: description.clone(),
                kw: kw.clone(),
            };
            build_corpus(ctx, pipeline, &request, progress).await?;
            Ok(())
        }
    }
}

/// Train the phrase models for a pipeline whose last step is the phrase step.
///
/// The steps before it run in produce mode so that the models are trained
/// on exactly what the phrase step would receive.
async fn build_phrases_job(
    ctx: &PipelineContext,
    pipeline: &[Step],
    file_name: &str,
    text_column: &str,
    phash: &str,
    settings: &PhraseSettings,
) -> Result<()> {
    let Some((_, upstream)) = pipeline.split_last() else {
        bail!("phrase job for {} has an empty pipeline", phash);
    };
    let content = build_pipeline(ctx, file_name, text_column, upstream, false).await?;
    let dir = ctx.storage.corpus_base_path(file_name)?;
    let phash = phash.to_string();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || {
        let corpus: Vec<_> = content.map(|doc| tokenized_text(&doc.text)).collect();
        tracing::info!(phash = %phash, docs = corpus.len(), level = settings.level, "training phrase models");
        build_phrase_models(corpus, &dir, &phash, &settings).map(|_| ())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentRegistry};
    use crate::coordinator::JobCoordinator;
    use crate::corpus::load_corpus;
    use crate::jobs::{InMemoryQueue, JobStatus, TaskQueue};
    use crate::models::{Metadata, ParamValue, Params};
    use crate::phash::phash;
    use crate::phrases::cache::model_path;
    use crate::phrases::PhraseFinder;
    use crate::storage::Storage;
    use std::time::Duration;

    fn context(root: &std::path::Path, queue: Arc<InMemoryQueue>) -> PipelineContext {
        let csv: String = std::iter::once("text,year".to_string())
            .chain((0..6).map(|i| format!("water quality report {} water quality,201{}", i, i)))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(root.join("f.csv"), csv + "\n").unwrap();
        PipelineContext::new(
            Arc::new(ComponentRegistry::with_builtins().unwrap()),
            Storage::new(root),
            JobCoordinator::new(queue, &QueueConfig::default()),
        )
    }

    fn phrase_pipeline() -> Vec<Step> {
        let mut params = Params::new();
        params.insert("min_count".into(), ParamValue::Int(3));
        params.insert("threshold".into(), ParamValue::Float(0.1));
        vec![Step::new(PhraseFinder::new().id(), "phrases", params)]
    }

    #[tokio::test]
    async fn preview_schedules_and_worker_builds_models() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = context(dir.path(), queue.clone());

        let preview: Vec<String> = build_pipeline(&ctx, "f.csv", "text", &phrase_pipeline(), true)
            .await
            .unwrap()
            .map(|d| d.text)
            .collect();
        assert_eq!(preview[0], "water quality report 0 water quality");
        assert_eq!(queue.snapshot().len(), 1);

        let worker = Worker::new(ctx.clone(), &QueueConfig::default());
        assert_eq!(worker.run(true).await.unwrap(), 1);
        assert_eq!(queue.snapshot()[0].status, JobStatus::Finished);

        let hash = phash("f.csv", "text", &phrase_pipeline());
        let base = ctx.storage.corpus_base_path("f.csv").unwrap();
        assert!(model_path(&base, &hash, 2).exists());

        let preview: Vec<String> = build_pipeline(&ctx, "f.csv", "text", &phrase_pipeline(), true)
            .await
            .unwrap()
            .map(|d| d.text)
            .collect();
        assert_eq!(preview[0], "water_quality report 0 water_quality");
        assert_eq!(queue.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn corpus_job_materializes_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = context(dir.path(), queue.clone());

        let spec = JobSpec::BuildCorpus {
            pipeline: phrase_pipeline(),
            corpus_id: "c1".into(),
            file_name: "f.csv".into(),
            text_column: "text".into(),
            title: "Water".into(),
            description: String::new(),
            kw: Metadata::new(),
        };
        ctx.jobs.submit(spec, Metadata::new()).await.unwrap();
        let job = Worker::new(ctx.clone(), &QueueConfig::default())
            .run_next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Finished, "job error: {:?}", job.error);

        let mut reader = load_corpus(&ctx.storage, "f.csv", "c1").unwrap().unwrap();
        assert_eq!(reader.info().statistics.docs, 6);
        let first = reader.iter().next().unwrap();
        assert_eq!(first.text, "water_quality report 0 water_quality");
        assert_eq!(first.metadata["year"], "2010");
    }

    #[tokio::test]
    async fn failing_job_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = context(dir.path(), queue.clone());

        let spec = JobSpec::BuildCorpus {
            pipeline: vec![Step::new("no_such_component", "s1", Params::new())],
            corpus_id: "c1".into(),
            file_name: "f.csv".into(),
            text_column: "text".into(),
            title: "Broken".into(),
            description: String::new(),
            kw: Metadata::new(),
        };
        ctx.jobs.submit(spec, Metadata::new()).await.unwrap();
        let job = Worker::new(ctx.clone(), &QueueConfig::default())
            .run_next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("no_such_component"));
        assert!(load_corpus(&ctx.storage, "f.csv", "c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_jobs_expire_before_claiming() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = context(dir.path(), queue.clone());
        let spec = JobSpec::BuildPhrases {
            pipeline: phrase_pipeline(),
            file_name: "f.csv".into(),
            text_column: "text".into(),
            phash: "abc".into(),
            settings: PhraseSettings::default(),
        };
        queue
            .enqueue(spec, Duration::from_secs(60), Metadata::new())
            .await
            .unwrap();

        let config = QueueConfig {
            ttl_secs: 0,
            ..QueueConfig::default()
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let worker = Worker::new(ctx, &config);
        assert!(worker.run_next().await.unwrap().is_none());
        let job = &queue.snapshot()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn started_job_of_a_dead_worker_is_failed_and_rescheduled() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = context(dir.path(), queue.clone());
        let spec = JobSpec::BuildPhrases {
            pipeline: phrase_pipeline(),
            file_name: "f.csv".into(),
            text_column: "text".into(),
            phash: "abc".into(),
            settings: PhraseSettings::default(),
        };
        queue
            .enqueue(spec.clone(), Duration::ZERO, crate::jobs::phash_meta("abc"))
            .await
            .unwrap();
        queue.claim_next().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let worker = Worker::new(ctx.clone(), &QueueConfig::default());
        assert_eq!(worker.expire_stale().await.unwrap(), 1);
        let job = &queue.snapshot()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("abandoned"));

        assert!(ctx.jobs.get_job_for("abc").await.is_none());
        let again = ctx.jobs.enqueue("abc", spec).await.unwrap();
        assert_eq!(ctx.jobs.get_job_for("abc").await.unwrap().id, again.id);
    }

    #[tokio::test]
    async fn once_mode_surfaces_queue_outage() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let ctx = context(dir.path(), queue.clone());
        queue.set_available(false);
        assert!(Worker::new(ctx, &QueueConfig::default()).run(true).await.is_err());
    }
}
