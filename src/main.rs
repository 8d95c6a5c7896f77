//! # Corpus Pipeline CLI (`corpus`)
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus init` | Create the storage root and the job table |
//! | `corpus components` | List registered components and their parameters |
//! | `corpus preview <file>` | Run a pipeline in preview mode, print documents as JSON lines |
//! | `corpus build <file>` | Materialize a corpus, or schedule it with `--queue` |
//! | `corpus worker` | Run background jobs |
//! | `corpus status <phash>` | Phrase model status for a pipeline hash |
//! | `corpus job <id>` | Show a background job |
//! | `corpus corpora <file>` | List corpora built for an uploaded file |
//! | `corpus delete <file> <corpus_id>` | Delete a corpus |
//! | `corpus serve` | Start the HTTP API |
//!
//! Pipelines are JSON files holding an array of
//! `{ "component": ..., "step_id": ..., "params": {...} }` objects.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use corpus_pipeline::config::{self, Config};
use corpus_pipeline::corpus::{self, CorpusRequest};
use corpus_pipeline::jobs::{JobSpec, SqliteQueue};
use corpus_pipeline::models::{Metadata, Step};
use corpus_pipeline::phrases::{phrase_model_status, phrase_steps};
use corpus_pipeline::pipeline::{build_pipeline, check_pipeline, PipelineContext};
use corpus_pipeline::progress::ProgressMode;
use corpus_pipeline::worker::Worker;
use corpus_pipeline::{migrate, server};

/// Composable text-processing pipelines over CSV corpora.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Corpus pipeline: preview, build and serve text corpora from CSV uploads",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/corpus.toml`. When that file does not exist the
    /// built-in defaults (storage under `./corpus`) are used.
    #[arg(long, global = true, default_value = "./config/corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage root and the job table. Idempotent.
    Init,

    /// List registered components with their parameters.
    Components,

    /// Run a pipeline in preview mode over the first rows of an upload.
    ///
    /// Documents are printed to stdout as JSON lines. Phrase steps without
    /// cached models schedule a background build and pass text through.
    Preview {
        /// Uploaded CSV file name, relative to the storage root.
        file: String,
        /// Column holding the text.
        #[arg(long)]
        column: String,
        /// Pipeline JSON file.
        #[arg(long)]
        pipeline: PathBuf,
        /// Number of documents to show (defaults to `[preview].max_rows`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Materialize a corpus from a pipeline.
    Build {
        file: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        pipeline: PathBuf,
        #[arg(long)]
        corpus_id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Schedule the build on the job queue instead of running it here.
        #[arg(long)]
        queue: bool,
        /// Progress output on stderr (defaults to human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Run background jobs from the queue.
    Worker {
        /// Exit once the queue is empty.
        #[arg(long)]
        once: bool,
    },

    /// Phrase model status for a pipeline hash.
    Status {
        phash: String,
        /// Require the complete model chain up to this level.
        #[arg(long)]
        level: Option<u32>,
    },

    /// Show a background job.
    Job { id: String },

    /// List corpora built for an uploaded file.
    Corpora { file: String },

    /// Delete a corpus.
    Delete { file: String, corpus_id: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("corpus_pipeline=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    Ok(Config::minimal())
}

fn read_pipeline(path: &Path) -> Result<Vec<Step>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline file: {}", path.display()))
}

async fn open_context(cfg: &Config) -> Result<PipelineContext> {
    let queue = SqliteQueue::open(cfg).await?;
    PipelineContext::from_config(cfg, Arc::new(queue))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = read_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Storage initialized at {}", cfg.storage.root.display());
        }
        Commands::Components => {
            let registry = corpus_pipeline::component::ComponentRegistry::with_builtins()?;
            for info in registry.describe() {
                println!("{}  {}", info.id, info.title);
                for param in info.params {
                    println!(
                        "    {} = {}  {}",
                        param.name,
                        param.default.to_json(),
                        param.title
                    );
                }
            }
        }
        Commands::Preview {
            file,
            column,
            pipeline,
            limit,
        } => {
            let steps = read_pipeline(&pipeline)?;
            let ctx = open_context(&cfg).await?;
            let limit = limit.unwrap_or(cfg.preview.max_rows);
            let content = build_pipeline(&ctx, &file, &column, &steps, true).await?;
            let docs = tokio::task::spawn_blocking(move || content.take(limit).collect::<Vec<_>>()).await?;
            for doc in docs {
                println!("{}", serde_json::to_string(&doc)?);
            }
            for step in phrase_steps(&file, &column, &steps) {
                let status = phrase_model_status(&ctx.storage, &ctx.jobs, &step.phash, step.level).await;
                eprintln!("phrases {} ({}): {}", step.step_id, step.phash, status);
            }
        }
        Commands::Build {
            file,
            column,
            pipeline,
            corpus_id,
            title,
            description,
            queue,
            progress,
        } => {
            let steps = read_pipeline(&pipeline)?;
            let ctx = open_context(&cfg).await?;
            if queue {
                check_pipeline(&ctx.registry, &steps)?;
                let spec = JobSpec::BuildCorpus {
                    pipeline: steps,
                    corpus_id,
                    file_name: file,
                    text_column: column,
                    title,
                    description,
                    kw: Metadata::new(),
                };
                let job = ctx.jobs.submit(spec, Metadata::new()).await?;
                println!("{}", job.id);
            } else {
                let request = CorpusRequest {
                    corpus_id,
                    file_name: file,
                    text_column: column,
                    title,
                    description,
                    kw: Metadata::new(),
                };
                let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
                let info = corpus::build_corpus(&ctx, &steps, &request, reporter).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
        }
        Commands::Worker { once } => {
            let ctx = open_context(&cfg).await?;
            let reporter = ProgressMode::default_for_tty().reporter();
            Worker::new(ctx, &cfg.queue)
                .with_progress(reporter)
                .run(once)
                .await?;
        }
        Commands::Status { phash, level } => {
            let ctx = open_context(&cfg).await?;
            println!("{}", phrase_model_status(&ctx.storage, &ctx.jobs, &phash, level).await);
        }
        Commands::Job { id } => {
            let ctx = open_context(&cfg).await?;
            let job = ctx.jobs.queue().fetch_job(&id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Corpora { file } => {
            let storage = corpus_pipeline::storage::Storage::new(cfg.storage.root.clone());
            for summary in corpus::available_corpora(&storage, &file)? {
                println!(
                    "{}  {}  {} docs",
                    summary.corpus_id, summary.info.title, summary.info.statistics.docs
                );
            }
        }
        Commands::Delete { file, corpus_id } => {
            let storage = corpus_pipeline::storage::Storage::new(cfg.storage.root.clone());
            if !corpus::delete_corpus(&storage, &file, &corpus_id)? {
                bail!("corpus {} not found for {}", corpus_id, file);
            }
            println!("Deleted corpus {}", corpus_id);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
