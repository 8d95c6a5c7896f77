//! End-to-end pipeline tests over real CSV uploads and the SQLite job queue.
//!
//! These exercise the same path as `corpus preview` / `corpus build` /
//! `corpus worker`: read a column, run the steps, schedule and run phrase
//! builds, and materialize corpora.

use anyhow::{bail, Result};
use async_trait::async_trait;
use corpus_pipeline::component::{Component, ComponentRegistry};
use corpus_pipeline::components::register_all_components;
use corpus_pipeline::config::Config;
use corpus_pipeline::corpus::{available_corpora, build_corpus, load_corpus, CorpusRequest};
use corpus_pipeline::jobs::{JobSpec, JobStatus, SqliteQueue, TaskQueue};
use corpus_pipeline::models::{Document, Metadata, ParamValue, Params, Step};
use corpus_pipeline::phrases::cache::{build_phrase_models, phrase_model_files};
use corpus_pipeline::phrases::{phrase_model_status, phrase_steps, PhraseFinder, PhraseSettings};
use corpus_pipeline::pipeline::{build_pipeline, Env, PipelineContext};
use corpus_pipeline::progress::NoProgress;
use corpus_pipeline::stream::{map_documents, tokenized_text, DocStream};
use corpus_pipeline::worker::Worker;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const HTML: &str = "corpus_pipeline_components_html_process";
const REGEX_TOKENIZER: &str = "corpus_pipeline_components_regex_tokenizer_process";
const PHRASES: &str = "corpus_pipeline_phrases_component_process";

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path().join("uploads");
    let queue = tmp.path().join("jobs.sqlite");
    let config_content = format!(
        r#"
[storage]
root = "{}"

[queue]
path = "{}"
poll_interval_ms = 20
wait_timeout_secs = 1

[server]
bind = "127.0.0.1:0"
"#,
        root.display(),
        queue.display()
    );
    toml::from_str(&config_content).unwrap()
}

fn write_upload(cfg: &Config, name: &str, rows: &[&str]) {
    std::fs::create_dir_all(&cfg.storage.root).unwrap();
    let mut writer = csv::Writer::from_path(cfg.storage.root.join(name)).unwrap();
    writer.write_record(["id", "text"]).unwrap();
    for (i, row) in rows.iter().enumerate() {
        writer.write_record([i.to_string().as_str(), *row]).unwrap();
    }
    writer.flush().unwrap();
}

async fn sqlite_context(cfg: &Config) -> (Arc<SqliteQueue>, PipelineContext) {
    let queue = Arc::new(SqliteQueue::open(cfg).await.unwrap());
    let ctx = PipelineContext::from_config(cfg, queue.clone()).unwrap();
    (queue, ctx)
}

async fn run_texts(ctx: &PipelineContext, file: &str, pipeline: &[Step], preview: bool) -> Vec<String> {
    build_pipeline(ctx, file, "text", pipeline, preview)
        .await
        .unwrap()
        .map(|d| d.text)
        .collect()
}

fn phrase_step(level: i64) -> Step {
    let mut params = Params::new();
    params.insert("level".into(), ParamValue::Int(level));
    params.insert("min_count".into(), ParamValue::Int(3));
    params.insert("threshold".into(), ParamValue::Float(0.1));
    Step::new(PHRASES, "phrases", params)
}

fn freshwater_rows() -> Vec<String> {
    let places = ["alpine", "coastal", "northern", "urban", "rural"];
    let mut rows = Vec::new();
    for (i, place) in places.iter().enumerate() {
        rows.push(format!("freshwater resources management. report {} differs", i));
        rows.push(format!("{} freshwater resources", place));
    }
    rows
}

// ─── Test component ─────────────────────────────────────────────────

/// Uppercases text and fails on any document containing "bad".
struct Shout;

#[async_trait]
impl Component for Shout {
    fn id(&self) -> &str {
        "test_shout"
    }

    fn title(&self) -> &str {
        "Shout"
    }

    async fn transform(&self, content: DocStream, _env: &Env, _params: &Params) -> Result<DocStream> {
        Ok(map_documents(content, "test_shout", |doc: &Document| {
            if doc.text.contains("bad") {
                bail!("refusing to shout");
            }
            Ok(doc.with_text(doc.text.to_uppercase()))
        }))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

/// HTML stripping followed by a word tokenizer over a CSV column.
#[tokio::test]
async fn test_html_strip_then_regex_tokenize() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_upload(&cfg, "docs.csv", &["<b>Hello</b> World", "plain text"]);
    let (_, ctx) = sqlite_context(&cfg).await;

    let mut params = Params::new();
    params.insert("regex".into(), r"\w+".into());
    let pipeline = vec![
        Step::new(HTML, "s1", Params::new()),
        Step::new(REGEX_TOKENIZER, "s2", params),
    ];

    let docs: Vec<Document> = build_pipeline(&ctx, "docs.csv", "text", &pipeline, true)
        .await
        .unwrap()
        .collect();
    let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
    assert_eq!(texts, vec!["Hello World", "plain text"]);
    assert_eq!(docs[1].metadata["id"], json!("1"));
}

/// A failing document is dropped; the rest of the stream carries on.
#[tokio::test]
async fn test_failing_document_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_upload(&cfg, "docs.csv", &["good one", "bad one", "good two"]);
    let (queue, _) = sqlite_context(&cfg).await;

    let mut registry = ComponentRegistry::new();
    register_all_components(&mut registry).unwrap();
    registry.register(Box::new(Shout)).unwrap();
    let ctx = PipelineContext::new(
        Arc::new(registry),
        corpus_pipeline::storage::Storage::new(cfg.storage.root.clone()),
        corpus_pipeline::coordinator::JobCoordinator::new(queue, &cfg.queue),
    );

    let pipeline = vec![Step::new("test_shout", "s1", Params::new())];
    assert_eq!(
        run_texts(&ctx, "docs.csv", &pipeline, false).await,
        vec!["GOOD ONE", "GOOD TWO"]
    );
}

/// Two previews of the same pipeline schedule exactly one phrase build.
#[tokio::test]
async fn test_repeated_previews_schedule_one_job() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let rows = freshwater_rows();
    let rows: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
    write_upload(&cfg, "water.csv", &rows);
    let (queue, ctx) = sqlite_context(&cfg).await;

    let pipeline = vec![phrase_step(2)];
    let first = run_texts(&ctx, "water.csv", &pipeline, true).await;
    let second = run_texts(&ctx, "water.csv", &pipeline, true).await;
    assert_eq!(first, rows);
    assert_eq!(second, rows);

    let queued = queue.queued_jobs().await.unwrap();
    assert_eq!(queued.len(), 1);
    let steps = phrase_steps("water.csv", "text", &pipeline);
    let phash = &steps[0].phash;
    assert_eq!(queued[0].phash(), Some(phash.as_str()));
    assert!(matches!(queued[0].spec, JobSpec::BuildPhrases { .. }));
    assert_eq!(
        phrase_model_status(&ctx.storage, &ctx.jobs, phash, steps[0].level).await,
        "preview_queued"
    );
}

/// Preview schedules, the worker trains, and the next preview replays.
#[tokio::test]
async fn test_worker_builds_models_for_preview() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let rows = freshwater_rows();
    let rows: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
    write_upload(&cfg, "water.csv", &rows);
    let (queue, ctx) = sqlite_context(&cfg).await;

    let pipeline = vec![phrase_step(3)];
    run_texts(&ctx, "water.csv", &pipeline, true).await;
    let job_id = queue.queued_jobs().await.unwrap()[0].id.clone();

    let processed = Worker::new(ctx.clone(), &cfg.queue).run(true).await.unwrap();
    assert_eq!(processed, 1);
    let job = queue.fetch_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finished, "job error: {:?}", job.error);

    let steps = phrase_steps("water.csv", "text", &pipeline);
    let phash = &steps[0].phash;
    assert_eq!(steps[0].level, Some(3));
    assert_eq!(
        phrase_model_status(&ctx.storage, &ctx.jobs, phash, steps[0].level).await,
        "OK"
    );

    let replayed = run_texts(&ctx, "water.csv", &pipeline, true).await;
    assert_eq!(replayed[0], "freshwater_resources_management. report 0 differs");
    assert_eq!(replayed[1], "alpine freshwater_resources");
    assert!(queue.queued_jobs().await.unwrap().is_empty());
}

/// Produce mode without a cache trains inline at level 3 and writes a corpus.
#[tokio::test]
async fn test_build_corpus_with_trigram_phrases() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let rows = freshwater_rows();
    let rows: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
    write_upload(&cfg, "water.csv", &rows);
    let (queue, ctx) = sqlite_context(&cfg).await;

    let mut kw = Metadata::new();
    kw.insert("pipeline".into(), json!("freshwater"));
    let request = CorpusRequest {
        corpus_id: "fw".into(),
        file_name: "water.csv".into(),
        text_column: "text".into(),
        title: "Freshwater".into(),
        description: "Trigram phrases".into(),
        kw,
    };
    let info = build_corpus(&ctx, &[phrase_step(3)], &request, Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(info.statistics.docs, 10);
    assert!(queue.queued_jobs().await.unwrap().is_empty());

    let listed = available_corpora(&ctx.storage, "water.csv").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].info.title, "Freshwater");

    let mut reader = load_corpus(&ctx.storage, "water.csv", "fw").unwrap().unwrap();
    let docs: Vec<Document> = reader.iter().collect();
    assert!(docs[0].text.starts_with("freshwater_resources_management"));
    assert!(docs[1].text.contains("freshwater_resources"));
    assert_eq!(docs[3].metadata["id"], json!("3"));
}

/// Phrase steps downstream of other steps hash and train on their prefix.
#[tokio::test]
async fn test_phrase_job_trains_on_upstream_output() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let rows: Vec<String> = freshwater_rows()
        .into_iter()
        .map(|r| format!("<p>{}</p>", r))
        .collect();
    let rows: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
    write_upload(&cfg, "water.csv", &rows);
    let (queue, ctx) = sqlite_context(&cfg).await;

    let pipeline = vec![Step::new(HTML, "strip", Params::new()), phrase_step(2)];
    run_texts(&ctx, "water.csv", &pipeline, true).await;
    let job = &queue.queued_jobs().await.unwrap()[0];
    match &job.spec {
        JobSpec::BuildPhrases { pipeline: prefix, .. } => {
            assert_eq!(prefix.len(), 2);
            assert_eq!(prefix[1].component, PhraseFinder::new().id());
        }
        other => panic!("unexpected job: {:?}", other),
    }

    Worker::new(ctx.clone(), &cfg.queue).run(true).await.unwrap();
    let replayed = run_texts(&ctx, "water.csv", &pipeline, true).await;
    assert_eq!(replayed[1], "alpine freshwater_resources");
}

/// Two builds racing on one pipeline hash leave a single complete artifact set.
#[tokio::test]
async fn test_concurrent_phrase_builds_leave_one_artifact_set() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("var").join("water.csv");
    std::fs::create_dir_all(&dir).unwrap();
    let corpus: Vec<_> = freshwater_rows().iter().map(|r| tokenized_text(r)).collect();
    let settings = PhraseSettings {
        level: 3,
        min_count: 3,
        threshold: 0.1,
        ..PhraseSettings::default()
    };

    let builds: Vec<_> = (0..2)
        .map(|_| {
            let (corpus, dir, settings) = (corpus.clone(), dir.clone(), settings.clone());
            tokio::task::spawn_blocking(move || {
                build_phrase_models(corpus, &dir, "abc", &settings).unwrap().0
            })
        })
        .collect();
    let mut runs = Vec::new();
    for build in builds {
        runs.push(build.await.unwrap());
    }
    assert_eq!(runs[0], runs[1]);

    let files = phrase_model_files(&dir, "abc");
    let levels: Vec<u32> = files.iter().map(|(level, _)| *level).collect();
    assert_eq!(levels, vec![2, 3]);
    for (i, (_, path)) in files.iter().enumerate() {
        let on_disk = std::fs::read(path).unwrap();
        assert_eq!(on_disk, serde_json::to_vec(&runs[0][i]).unwrap());
        assert_eq!(on_disk, serde_json::to_vec(&runs[1][i]).unwrap());
    }

    let names: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2, "unexpected files: {:?}", names);
    assert!(names.iter().all(|n| !n.ends_with(".tmp")));
}
