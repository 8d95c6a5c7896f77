//! Task queue interface for background jobs.
//!
//! Expensive work (phrase model training, full corpus builds) runs in a
//! worker process that pulls jobs from a shared queue. This module defines
//! the queue contract; [`sqlite`] provides the durable transport used by the
//! CLI and server, [`memory`] an in-process one for tests.
//!
//! Transport failures surface as [`QueueError::Unavailable`] so callers can
//! tell "the queue is down" apart from "no such job".

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::models::{Metadata, Step};
use crate::phrases::PhraseSettings;

pub use memory::InMemoryQueue;
pub use sqlite::SqliteQueue;

/// Metadata key holding the pipeline hash a job was scheduled for.
pub const PHASH_META_KEY: &str = "phash";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task queue unavailable: {0}")]
    Unavailable(String),

    #[error("job not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => QueueError::NotFound("no matching row".to_string()),
            other => QueueError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Deferred,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Deferred => "deferred",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "started" => Some(JobStatus::Started),
            "deferred" => Some(JobStatus::Deferred),
            "finished" => Some(JobStatus::Finished),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Finished or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job does, with all of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    /// Train and persist phrase models for the pipeline prefix ending at a
    /// phrase step.
    BuildPhrases {
        pipeline: Vec<Step>,
        file_name: String,
        text_column: String,
        phash: String,
        settings: PhraseSettings,
    },
    /// Run a full pipeline in produce mode and materialize the corpus.
    BuildCorpus {
        pipeline: Vec<Step>,
        corpus_id: String,
        file_name: String,
        text_column: String,
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        kw: Metadata,
    },
}

impl JobSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            JobSpec::BuildPhrases { .. } => "build_phrases",
            JobSpec::BuildCorpus { .. } => "build_corpus",
        }
    }
}

/// Snapshot of a job's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub status: JobStatus,
    pub meta: Metadata,
    pub spec: JobSpec,
    pub timeout_secs: u64,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobHandle {
    /// The pipeline hash recorded in the job metadata, if any.
    pub fn phash(&self) -> Option<&str> {
        self.meta.get(PHASH_META_KEY).and_then(|v| v.as_str())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Started, and still not ended past its own timeout. Its worker is gone.
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (JobStatus::Started, Some(started)) => {
                started + chrono::Duration::seconds(self.timeout_secs as i64) < now
            }
            _ => false,
        }
    }
}

/// A shared queue of background jobs.
///
/// Implementations must be safe to use from several processes at once:
/// [`claim_next`](TaskQueue::claim_next) hands each queued job to exactly
/// one caller.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a job in the `queued` state.
    async fn enqueue(
        &self,
        spec: JobSpec,
        timeout: Duration,
        meta: Metadata,
    ) -> Result<JobHandle, QueueError>;

    /// Current state of one job.
    async fn fetch_job(&self, id: &str) -> Result<JobHandle, QueueError>;

    /// Ids of jobs currently executing.
    async fn started_job_ids(&self) -> Result<Vec<String>, QueueError>;

    /// Jobs waiting to be picked up, oldest first.
    async fn queued_jobs(&self) -> Result<Vec<JobHandle>, QueueError>;

    /// Move the oldest queued job to `started` and return it.
    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError>;

    async fn mark_finished(&self, id: &str) -> Result<(), QueueError>;

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), QueueError>;

    /// Fail every queued job enqueued before `cutoff`. Returns how many.
    async fn expire_queued(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError>;

    /// Fail every started job whose timeout ran out before `now`. Returns how many.
    async fn expire_abandoned(&self, now: DateTime<Utc>) -> Result<usize, QueueError>;
}

/// Job metadata carrying only a pipeline hash.
pub fn phash_meta(phash: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(PHASH_META_KEY.to_string(), phash.into());
    meta
}
