use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            job_timeout_secs: default_job_timeout_secs(),
            ttl_secs: default_ttl_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("./corpus/jobs.sqlite")
}
fn default_job_timeout_secs() -> u64 {
    3600
}
fn default_ttl_secs() -> u64 {
    900
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_wait_timeout_secs() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreviewConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
        }
    }
}

fn default_max_rows() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Defaults rooted at `./corpus`, for commands run without a config file.
    pub fn minimal() -> Self {
        Self {
            storage: StorageConfig {
                root: PathBuf::from("./corpus"),
            },
            queue: QueueConfig::default(),
            preview: PreviewConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:6543".to_string(),
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.queue.job_timeout_secs == 0 {
        anyhow::bail!("queue.job_timeout_secs must be > 0");
    }
    if config.queue.ttl_secs == 0 {
        anyhow::bail!("queue.ttl_secs must be > 0");
    }
    if config.queue.poll_interval_ms == 0 {
        anyhow::bail!("queue.poll_interval_ms must be > 0");
    }
    if config.preview.max_rows == 0 {
        anyhow::bail!("preview.max_rows must be >= 1");
    }
    Ok(())
}
