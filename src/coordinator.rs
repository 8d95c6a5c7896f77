//! Background job coordination.
//!
//! Wraps a [`TaskQueue`] with the lookups the pipeline needs: "is a job for
//! this pipeline hash already in flight?", "schedule one", and "wait for it".
//! Queue transport failures are logged here and reported as "no job", so a
//! queue outage degrades previews instead of failing them.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::QueueConfig;
use crate::jobs::{phash_meta, JobHandle, JobSpec, JobStatus, QueueError, TaskQueue};
use crate::models::Metadata;

#[derive(Clone)]
pub struct JobCoordinator {
    queue: Arc<dyn TaskQueue>,
    job_timeout: Duration,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl JobCoordinator {
    pub fn new(queue: Arc<dyn TaskQueue>, config: &QueueConfig) -> Self {
        Self {
            queue,
            job_timeout: config.job_timeout(),
            poll_interval: config.poll_interval(),
            wait_timeout: config.wait_timeout(),
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// First started or queued job tagged with `phash`.
    pub async fn get_job_for(&self, phash: &str) -> Option<JobHandle> {
        match self.find_job(phash).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(phash, error = %e, "could not look up background jobs");
                None
            }
        }
    }

    async fn find_job(&self, phash: &str) -> Result<Option<JobHandle>, QueueError> {
        for id in self.queue.started_job_ids().await? {
            let job = match self.queue.fetch_job(&id).await {
                Ok(job) => job,
                // Finished and cleaned up between the two calls.
                Err(QueueError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if job.phash() == Some(phash) && !job.is_abandoned(Utc::now()) {
                return Ok(Some(job));
            }
        }
        Ok(self
            .queue
            .queued_jobs()
            .await?
            .into_iter()
            .find(|job| job.phash() == Some(phash)))
    }

    /// Schedule `spec` tagged with `phash`. `None` if the queue is unreachable.
    pub async fn enqueue(&self, phash: &str, spec: JobSpec) -> Option<JobHandle> {
        match self.submit(spec, phash_meta(phash)).await {
            Ok(job) => {
                tracing::info!(phash, job_id = %job.id, kind = job.spec.kind(), "enqueued background job");
                Some(job)
            }
            Err(e) => {
                tracing::warn!(phash, error = %e, "could not enqueue background job");
                None
            }
        }
    }

    /// Schedule `spec` with the configured job timeout, surfacing queue errors.
    pub async fn submit(&self, spec: JobSpec, meta: Metadata) -> Result<JobHandle, QueueError> {
        self.queue.enqueue(spec, self.job_timeout, meta).await
    }

    /// Wait for the in-flight job for `phash` to end.
    ///
    /// Returns `true` once it has finished, `false` if it failed, vanished,
    /// or made no progress for `timeout`. Time spent while the job is
    /// running does not count against `timeout`, but the wait never outlasts
    /// the job's own timeout plus `timeout`.
    pub async fn wait_for_completion(&self, phash: &str, poll: Duration, timeout: Duration) -> bool {
        let Some(job) = self.get_job_for(phash).await else {
            return false;
        };
        let deadline = Instant::now() + job.timeout() + timeout;
        let mut idle = Duration::ZERO;

        loop {
            let job = match self.queue.fetch_job(&job.id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(phash, job_id = %job.id, error = %e, "lost track of background job");
                    return false;
                }
            };
            match job.status {
                JobStatus::Finished => return true,
                JobStatus::Failed => {
                    tracing::warn!(phash, job_id = %job.id, error = ?job.error, "background job failed");
                    return false;
                }
                JobStatus::Started if job.is_abandoned(Utc::now()) => {
                    tracing::warn!(phash, job_id = %job.id, "background job outlived its timeout");
                    return false;
                }
                JobStatus::Started => idle = Duration::ZERO,
                JobStatus::Queued | JobStatus::Deferred => {}
            }
            if idle >= timeout || Instant::now() >= deadline {
                tracing::warn!(phash, job_id = %job.id, status = %job.status, "gave up waiting for background job");
                return false;
            }
            tokio::time::sleep(poll).await;
            idle += poll;
        }
    }

    /// Look up a job by id. `None` when unknown or the queue is down.
    pub async fn job_status(&self, id: &str) -> Option<JobHandle> {
        match self.queue.fetch_job(id).await {
            Ok(job) => Some(job),
            Err(QueueError::NotFound(_)) => None,
            Err(e) => {
                tracing::warn!(job_id = id, error = %e, "could not fetch job");
                None
            }
        }
    }
}
