//! Pipeline executor.
//!
//! Composes an ordered list of [`Step`]s into one lazy document stream.
//! Construction is eager about validation: duplicate step ids and unknown
//! components fail before a single row is read. Streaming is lazy: nothing
//! runs until the caller pulls documents.
//!
//! ```text
//! CSV column ──▶ step 1 ──▶ step 2 ──▶ ... ──▶ step N ──▶ Documents
//!                 │          │                  │
//!              phash(1)   phash(2)           phash(N)
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::component::ComponentRegistry;
use crate::config::Config;
use crate::coordinator::JobCoordinator;
use crate::error::PipelineError;
use crate::jobs::TaskQueue;
use crate::models::{validate_pipeline, Step};
use crate::phash::phash;
use crate::source::read_column;
use crate::storage::Storage;
use crate::stream::{normalize, DocStream};

/// Long-lived services shared by every pipeline run.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<ComponentRegistry>,
    pub storage: Storage,
    pub jobs: JobCoordinator,
}

impl PipelineContext {
    pub fn new(registry: Arc<ComponentRegistry>, storage: Storage, jobs: JobCoordinator) -> Self {
        Self {
            registry,
            storage,
            jobs,
        }
    }

    /// Built-in components, the configured storage root, and `queue`.
    pub fn from_config(config: &Config, queue: Arc<dyn TaskQueue>) -> Result<Self> {
        let registry = ComponentRegistry::with_builtins()?;
        Ok(Self::new(
            Arc::new(registry),
            Storage::new(config.storage.root.clone()),
            JobCoordinator::new(queue, &config.queue),
        ))
    }
}

/// What a component sees about the run it is part of.
///
/// Rebuilt by the executor for every step; components only read it.
#[derive(Clone)]
pub struct Env {
    pub file_name: String,
    pub text_column: String,
    /// The whole pipeline, not just the prefix ending at this step.
    pub pipeline: Arc<Vec<Step>>,
    pub step_id: String,
    /// Hash of the prefix ending at this step.
    pub phash: String,
    pub preview_mode: bool,
    pub storage: Storage,
    pub jobs: JobCoordinator,
}

impl Env {
    /// Steps up to and including the current one.
    pub fn prefix(&self) -> Vec<Step> {
        pipeline_for_step(&self.pipeline, &self.step_id)
    }

    /// Working directory for cache artifacts of the current file.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        self.storage.corpus_base_path(&self.file_name)
    }
}

/// Steps up to and including `step_id`; the whole pipeline if it is absent.
pub fn pipeline_for_step(pipeline: &[Step], step_id: &str) -> Vec<Step> {
    match pipeline.iter().position(|s| s.step_id == step_id) {
        Some(i) => pipeline[..=i].to_vec(),
        None => pipeline.to_vec(),
    }
}

/// Reject pipelines with reused step ids or unregistered components.
pub fn check_pipeline(registry: &ComponentRegistry, pipeline: &[Step]) -> Result<(), PipelineError> {
    validate_pipeline(pipeline)?;
    for step in pipeline {
        if registry.lookup(&step.component).is_none() {
            return Err(PipelineError::UnknownComponent {
                component_id: step.component.clone(),
                step_id: step.step_id.clone(),
            });
        }
    }
    Ok(())
}

/// Run `pipeline` over one column of an uploaded file.
pub async fn build_pipeline(
    ctx: &PipelineContext,
    file_name: &str,
    text_column: &str,
    pipeline: &[Step],
    preview_mode: bool,
) -> Result<DocStream> {
    check_pipeline(&ctx.registry, pipeline)?;
    let path = ctx.storage.upload_location(file_name)?;
    let source = read_column(&path, text_column)?;
    build_pipeline_from(ctx, source, file_name, text_column, pipeline, preview_mode).await
}

/// Run `pipeline` over an already opened stream attributed to `file_name`.
pub async fn build_pipeline_from(
    ctx: &PipelineContext,
    source: DocStream,
    file_name: &str,
    text_column: &str,
    pipeline: &[Step],
    preview_mode: bool,
) -> Result<DocStream> {
    check_pipeline(&ctx.registry, pipeline)?;

    let full = Arc::new(pipeline.to_vec());
    let mut content = source;
    for (i, step) in pipeline.iter().enumerate() {
        let component = ctx
            .registry
            .lookup(&step.component)
            .ok_or_else(|| PipelineError::UnknownComponent {
                component_id: step.component.clone(),
                step_id: step.step_id.clone(),
            })?;
        let env = Env {
            file_name: file_name.to_string(),
            text_column: text_column.to_string(),
            pipeline: full.clone(),
            step_id: step.step_id.clone(),
            phash: phash(file_name, text_column, &pipeline[..=i]),
            preview_mode,
            storage: ctx.storage.clone(),
            jobs: ctx.jobs.clone(),
        };
        tracing::debug!(step_id = %step.step_id, component = %step.component, phash = %env.phash, "adding pipeline step");
        content = component
            .transform(content, &env, &step.params)
            .await
            .with_context(|| format!("step '{}' ({})", step.step_id, step.component))?;
    }

    Ok(Box::new(content.map(normalize)))
}
