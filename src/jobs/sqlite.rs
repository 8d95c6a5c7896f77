//! SQLite-backed task queue.
//!
//! Jobs live in the `jobs` table (see [`crate::migrate`]). Claiming a job is
//! a single `UPDATE ... RETURNING` statement, so two workers sharing the
//! database never receive the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use super::{JobHandle, JobSpec, JobStatus, QueueError, TaskQueue, PHASH_META_KEY};
use crate::config::Config;
use crate::models::Metadata;

const COLUMNS: &str =
    "id, status, meta_json, spec_json, timeout_secs, enqueued_at, started_at, ended_at, error";

pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured queue database, creating the schema if needed.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::create_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, QueueError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Unavailable(format!("corrupt timestamp in job row: {}", ms)))
}

fn row_to_handle(row: &SqliteRow) -> Result<JobHandle, QueueError> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| QueueError::Unavailable(format!("unknown job status '{}'", status)))?;
    let meta_json: String = row.try_get("meta_json")?;
    let spec_json: String = row.try_get("spec_json")?;
    let meta: Metadata = serde_json::from_str(&meta_json)
        .map_err(|e| QueueError::Unavailable(format!("corrupt job metadata: {}", e)))?;
    let spec: JobSpec = serde_json::from_str(&spec_json)
        .map_err(|e| QueueError::Unavailable(format!("corrupt job arguments: {}", e)))?;
    let timeout_secs: i64 = row.try_get("timeout_secs")?;
    let enqueued_at: i64 = row.try_get("enqueued_at")?;
    let started_at: Option<i64> = row.try_get("started_at")?;
    let ended_at: Option<i64> = row.try_get("ended_at")?;

    Ok(JobHandle {
        id: row.try_get("id")?,
        status,
        meta,
        spec,
        timeout_secs: timeout_secs.max(0) as u64,
        enqueued_at: from_millis(enqueued_at)?,
        started_at: started_at.map(from_millis).transpose()?,
        ended_at: ended_at.map(from_millis).transpose()?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl TaskQueue for SqliteQueue {
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
        let meta_json = serde_json::to_string(&handle.meta)
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let spec_json = serde_json::to_string(&handle.spec)
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        sqlx::query(
            "INSERT INTO jobs (id, status, phash, meta_json, spec_json, timeout_secs, enqueued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&handle.id)
        .bind(handle.status.as_str())
        .bind(handle.meta.get(PHASH_META_KEY).and_then(|v| v.as_str()))
        .bind(meta_json)
        .bind(spec_json)
        .bind(handle.timeout_secs as i64)
        .bind(millis(handle.enqueued_at))
        .execute(&self.pool)
        .await?;

        Ok(handle)
    }

    async fn fetch_job(&self, id: &str) -> Result<JobHandle, QueueError> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        row_to_handle(&row)
    }

    async fn started_job_ids(&self) -> Result<Vec<String>, QueueError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE status = 'started' ORDER BY started_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn queued_jobs(&self) -> Result<Vec<JobHandle>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE status = 'queued' ORDER BY enqueued_at, rowid",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_handle).collect()
    }

    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = 'started', started_at = ?
             WHERE status = 'queued' AND id = (
                 SELECT id FROM jobs WHERE status = 'queued'
                 ORDER BY enqueued_at, rowid LIMIT 1
             )
             RETURNING {}",
            COLUMNS
        ))
        .bind(millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_handle).transpose()
    }

    async fn mark_finished(&self, id: &str) -> Result<(), QueueError> {
        let result = sqlx::query("UPDATE jobs SET status = 'finished', ended_at = ? WHERE id = ?")
            .bind(millis(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', ended_at = ?, error = ? WHERE id = ?",
        )
        .bind(millis(Utc::now()))
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn expire_queued(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', ended_at = ?, error = 'expired'
             WHERE status = 'queued' AND enqueued_at < ?",
        )
        .bind(millis(Utc::now()))
        .bind(millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn expire_abandoned(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', ended_at = ?, error = 'abandoned'
             WHERE status = 'started' AND started_at + timeout_secs * 1000 < ?",
        )
        .bind(millis(Utc::now()))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}
