//! HTTP API tests against a spawned server on a free port.

use corpus_pipeline::config::Config;
use corpus_pipeline::jobs::{InMemoryQueue, TaskQueue};
use corpus_pipeline::pipeline::PipelineContext;
use corpus_pipeline::server::run_server_with_queue;
use corpus_pipeline::worker::Worker;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const HTML: &str = "corpus_pipeline_components_html_process";
const PHRASES: &str = "corpus_pipeline_phrases_component_process";

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let config_content = format!(
        r#"
[storage]
root = "{}"

[queue]
path = "{}"

[preview]
max_rows = 2

[server]
bind = "127.0.0.1:{}"
"#,
        tmp.path().join("uploads").display(),
        tmp.path().join("jobs.sqlite").display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server over an in-memory queue with one uploaded CSV.
async fn start(tmp: &TempDir) -> (Config, Arc<InMemoryQueue>, String) {
    let port = find_free_port();
    let cfg = test_config_with_port(tmp, port);
    std::fs::create_dir_all(&cfg.storage.root).unwrap();
    std::fs::write(
        cfg.storage.root.join("docs.csv"),
        "text,lang\n\"<b>Hello</b> World\",en\nplain text,en\nthird row,de\n",
    )
    .unwrap();

    let queue = Arc::new(InMemoryQueue::new());
    let server_cfg = cfg.clone();
    let server_queue: Arc<dyn TaskQueue> = queue.clone();
    tokio::spawn(async move {
        run_server_with_queue(&server_cfg, server_queue).await.unwrap();
    });
    wait_for_server(port).await;
    (cfg, queue, format!("http://127.0.0.1:{}", port))
}

#[tokio::test]
async fn test_health_and_components() {
    let tmp = TempDir::new().unwrap();
    let (_, _, base) = start(&tmp).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let body: Value = client
        .get(format!("{}/components", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let components = body["components"].as_array().unwrap();
    assert_eq!(components.len(), 8);
    assert_eq!(components[0]["id"], HTML);
    assert_eq!(components[0]["title"], "Strip HTML tags");
    let phrases = components.iter().find(|c| c["id"] == PHRASES).unwrap();
    let level = phrases["params"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "level")
        .unwrap();
    assert_eq!(level["default"], 2);
    assert_eq!(level["kind"]["type"], "choice");
}

#[tokio::test]
async fn test_preview_limits_rows_and_reports_phrase_status() {
    let tmp = TempDir::new().unwrap();
    let (_, queue, base) = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/preview", base))
        .json(&json!({
            "file_name": "docs.csv",
            "text_column": "text",
            "pipeline": [
                { "component": HTML, "step_id": "s1", "params": {} },
                { "component": PHRASES, "step_id": "s2", "params": { "min_count": 1 } }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["text"], "Hello World");
    assert_eq!(docs[0]["metadata"]["lang"], "en");
    assert_eq!(body["phrase_status"]["s2"], "preview_queued");
    assert_eq!(queue.queued_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_preview_rejects_unknown_component() {
    let tmp = TempDir::new().unwrap();
    let (_, _, base) = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/preview", base))
        .json(&json!({
            "file_name": "docs.csv",
            "text_column": "text",
            "pipeline": [{ "component": "nope", "step_id": "s9", "params": {} }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("nope") && message.contains("s9"), "{}", message);

    let resp = client
        .post(format!("{}/preview", base))
        .json(&json!({ "file_name": "missing.csv", "text_column": "text", "pipeline": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/preview", base))
        .json(&json!({ "file_name": "docs.csv", "text_column": "body", "pipeline": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_corpus_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let (cfg, queue, base) = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/corpus", base))
        .json(&json!({
            "file_name": "docs.csv",
            "text_column": "text",
            "corpus_id": "c1",
            "title": "Docs",
            "pipeline": [{ "component": HTML, "step_id": "s1", "params": {} }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["corpus_id"], "c1");
    let job_id = created["job_id"].as_str().unwrap().to_string();

    let job: Value = client
        .get(format!("{}/jobs/{}", base, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "queued");
    assert_eq!(job["kind"], "build_corpus");

    let ctx = PipelineContext::from_config(&cfg, queue.clone()).unwrap();
    Worker::new(ctx, &cfg.queue).run(true).await.unwrap();

    let job: Value = client
        .get(format!("{}/jobs/{}", base, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "finished");

    let list: Value = client
        .get(format!("{}/corpus/docs.csv", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["corpora"][0]["corpus_id"], "c1");
    assert_eq!(list["corpora"][0]["info"]["statistics"]["docs"], 3);

    let page: Value = client
        .get(format!("{}/corpus/docs.csv/c1?page=1&per_page=2", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let docs = page["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["text"], "third row");
    assert_eq!(page["info"]["title"], "Docs");

    // Rebuilding under the same id serves the new documents.
    let resp = client
        .post(format!("{}/corpus", base))
        .json(&json!({
            "file_name": "docs.csv",
            "text_column": "text",
            "corpus_id": "c1",
            "title": "Docs raw",
            "pipeline": []
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let ctx = PipelineContext::from_config(&cfg, queue.clone()).unwrap();
    Worker::new(ctx, &cfg.queue).run(true).await.unwrap();
    let page: Value = client
        .get(format!("{}/corpus/docs.csv/c1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["documents"][0]["text"], "<b>Hello</b> World");
    assert_eq!(page["info"]["title"], "Docs raw");

    let resp = client
        .delete(format!("{}/corpus/docs.csv/c1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .get(format!("{}/corpus/docs.csv/c1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(format!("{}/jobs/does-not-exist", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
