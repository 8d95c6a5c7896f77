//! In-process task queue.
//!
//! Behaves like [`super::SqliteQueue`] without a database. The transport can
//! be switched off with [`InMemoryQueue::set_available`] to exercise the
//! "queue is down" paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{JobHandle, JobSpec, JobStatus, QueueError, TaskQueue};
use crate::models::Metadata;

pub struct InMemoryQueue {
    jobs: Mutex<Vec<JobHandle>>,
    available: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the transport going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every job ever enqueued, in submission order.
    pub fn snapshot(&self) -> Vec<JobHandle> {
        match self.jobs.lock() {
            Ok(jobs) => jobs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<JobHandle>>, QueueError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory queue switched off".into()));
        }
        self.jobs
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".into()))
    }

    fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut JobHandle),
    ) -> Result<(), QueueError> {
        let mut jobs = self.lock()?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        f(job);
        Ok(())
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        spec: JobSpec,
        timeout: Duration,
        meta: Metadata,
    ) -> Result<JobHandle, QueueError> {
        let handle = JobHandle {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            meta,
            spec,
            timeout_secs: timeout.as_secs(),
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        };
        self.lock()?.push(handle.clone());
        Ok(handle)
    }

    async fn fetch_job(&self, id: &str) -> Result<JobHandle, QueueError> {
        self.lock()?
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    async fn started_job_ids(&self) -> Result<Vec<String>, QueueError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|j| j.status == JobStatus::Started)
            .map(|j| j.id.clone())
            .collect())
    }

    async fn queued_jobs(&self) -> Result<Vec<JobHandle>, QueueError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .cloned()
            .collect())
    }

    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError> {
        let mut jobs = self.lock()?;
        let Some(job) = jobs.iter_mut().find(|j| j.status == JobStatus::Queued) else {
            return Ok(None);
        };
        job.status = JobStatus::Started;
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn mark_finished(&self, id: &str) -> Result<(), QueueError> {
        self.update(id, |job| {
            job.status = JobStatus::Finished;
            job.ended_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.ended_at = Some(Utc::now());
            job.error = Some(error.to_string());
        })
    }

    async fn expire_queued(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut jobs = self.lock()?;
        let mut expired = 0;
        for job in jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Queued && j.enqueued_at < cutoff)
        {
            job.status = JobStatus::Failed;
            job.ended_at = Some(Utc::now());
            job.error = Some("expired".to_string());
            expired += 1;
        }
        Ok(expired)
    }

    async fn expire_abandoned(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut jobs = self.lock()?;
        let mut expired = 0;
        for job in jobs.iter_mut().filter(|j| j.is_abandoned(now)) {
            job.status = JobStatus::Failed;
            job.ended_at = Some(Utc::now());
            job.error = Some("abandoned".to_string());
            expired += 1;
        }
        Ok(expired)
    }
}
