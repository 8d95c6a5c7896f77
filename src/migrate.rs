use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the storage root and the job table. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.storage.root)?;
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // One row per background job. `phash` is copied out of `meta_json` so
    // lookups by pipeline hash can use an index.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            phash TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            spec_json TEXT NOT NULL,
            timeout_secs INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            started_at INTEGER,
            ended_at INTEGER,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, enqueued_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_phash ON jobs(phash)")
        .execute(pool)
        .await?;

    Ok(())
}
