//! HTTP API.
//!
//! A thin JSON surface over the pipeline, the job queue and the corpus
//! store, for the web front end that edits pipelines and browses corpora.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/components` | Registered components with parameter schemas |
//! | `POST`   | `/preview` | Run a pipeline in preview mode over the first rows |
//! | `GET`    | `/phrase-model-status/{phash}` | Phrase model availability (`?level=` for a complete chain) |
//! | `POST`   | `/corpus` | Schedule a corpus build |
//! | `GET`    | `/jobs/{id}` | Job status |
//! | `GET`    | `/corpus/{file}` | Corpora built for an uploaded file |
//! | `GET`    | `/corpus/{file}/{corpus_id}` | One page of a corpus (`?page=&per_page=`) |
//! | `DELETE` | `/corpus/{file}/{corpus_id}` | Delete a corpus |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown component 'x' referenced by step 's1'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500),
//! `queue_unavailable` (503).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::component::ComponentInfo;
use crate::config::Config;
use crate::corpus::{available_corpora, delete_corpus, CorpusCache, CorpusSummary};
use crate::error::PipelineError;
use crate::jobs::{JobSpec, JobStatus, QueueError, SqliteQueue, TaskQueue};
use crate::models::{CorpusInfo, Document, Metadata, Step};
use crate::phrases::{phrase_model_status, phrase_steps};
use crate::pipeline::{build_pipeline, check_pipeline, PipelineContext};

/// Largest page a client may request from `/corpus/{file}/{corpus_id}`.
const MAX_PER_PAGE: usize = 1000;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    ctx: PipelineContext,
    corpora: CorpusCache,
}

/// Start the HTTP server backed by the configured SQLite job queue.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let queue = SqliteQueue::open(config).await?;
    run_server_with_queue(config, Arc::new(queue)).await
}

/// Start the HTTP server on top of an arbitrary task queue.
pub async fn run_server_with_queue(config: &Config, queue: Arc<dyn TaskQueue>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        ctx: PipelineContext::from_config(config, queue)?,
        corpora: CorpusCache::new(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/components", get(handle_components))
        .route("/preview", post(handle_preview))
        .route("/phrase-model-status/{phash}", get(handle_phrase_status))
        .route("/corpus", post(handle_create_corpus))
        .route("/jobs/{id}", get(handle_job))
        .route("/corpus/{file}", get(handle_list_corpora))
        .route(
            "/corpus/{file}/{corpus_id}",
            get(handle_view_corpus).delete(handle_delete_corpus),
        )
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "corpus API listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(_) => not_found(e.to_string()),
            QueueError::Unavailable(_) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "queue_unavailable".to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Pipeline contract violations are the caller's fault; anything else is ours.
fn classify_pipeline_error(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::DuplicateComponent(_)) | None => internal(format!("{:#}", err)),
        Some(e) => bad_request(e.to_string()),
    }
}

/// Resolve an uploaded file, rejecting unsafe names and missing uploads.
fn require_upload(state: &AppState, file_name: &str) -> Result<(), AppError> {
    let path = state
        .ctx
        .storage
        .upload_location(file_name)
        .map_err(|e| bad_request(e.to_string()))?;
    if !path.is_file() {
        return Err(not_found(format!("no uploaded file named {}", file_name)));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /components ============

#[derive(Serialize)]
struct ComponentsResponse {
    components: Vec<ComponentInfo>,
}

async fn handle_components(State(state): State<AppState>) -> Json<ComponentsResponse> {
    Json(ComponentsResponse {
        components: state.ctx.registry.describe(),
    })
}

// ============ POST /preview ============

#[derive(Deserialize)]
struct PreviewRequest {
    file_name: String,
    text_column: String,
    #[serde(default)]
    pipeline: Vec<Step>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct PreviewResponse {
    documents: Vec<Document>,
    /// Phrase model status per phrase step id.
    phrase_status: BTreeMap<String, String>,
}

/// Run the pipeline in preview mode and return its first documents.
///
/// Never waits for phrase models: a phrase step without cached models
/// schedules a build and passes its input through.
async fn handle_preview(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, AppError> {
    require_upload(&state, &req.file_name)?;
    let limit = req.limit.unwrap_or(state.config.preview.max_rows).max(1);

    let content = build_pipeline(&state.ctx, &req.file_name, &req.text_column, &req.pipeline, true)
        .await
        .map_err(classify_pipeline_error)?;
    let documents = tokio::task::spawn_blocking(move || content.take(limit).collect::<Vec<_>>())
        .await
        .map_err(|e| internal(e.to_string()))?;

    let mut phrase_status = BTreeMap::new();
    for step in phrase_steps(&req.file_name, &req.text_column, &req.pipeline) {
        let status =
            phrase_model_status(&state.ctx.storage, &state.ctx.jobs, &step.phash, step.level).await;
        phrase_status.insert(step.step_id, status);
    }

    Ok(Json(PreviewResponse {
        documents,
        phrase_status,
    }))
}

// ============ GET /phrase-model-status/{phash} ============

#[derive(Serialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct StatusQuery {
    level: Option<u32>,
}

async fn handle_phrase_status(
    State(state): State<AppState>,
    Path(phash): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: phrase_model_status(&state.ctx.storage, &state.ctx.jobs, &phash, query.level).await,
    })
}

// ============ POST /corpus ============

#[derive(Deserialize)]
struct CreateCorpusRequest {
    file_name: String,
    text_column: String,
    pipeline: Vec<Step>,
    corpus_id: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    kw: Metadata,
}

#[derive(Serialize)]
struct CreateCorpusResponse {
    job_id: String,
    corpus_id: String,
}

async fn handle_create_corpus(
    State(state): State<AppState>,
    Json(req): Json<CreateCorpusRequest>,
) -> Result<(StatusCode, Json<CreateCorpusResponse>), AppError> {
    require_upload(&state, &req.file_name)?;
    if req.title.trim().is_empty() {
        return Err(bad_request("title must not be empty"));
    }
    check_pipeline(&state.ctx.registry, &req.pipeline).map_err(|e| bad_request(e.to_string()))?;

    let corpus_id = req
        .corpus_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let mut meta = Metadata::new();
    meta.insert("corpus_id".to_string(), corpus_id.clone().into());
    meta.insert("file_name".to_string(), req.file_name.clone().into());

    let file_name = req.file_name.clone();
    let spec = JobSpec::BuildCorpus {
        pipeline: req.pipeline,
        corpus_id: corpus_id.clone(),
        file_name: req.file_name,
        text_column: req.text_column,
        title: req.title,
        description: req.description,
        kw: req.kw,
    };
    let job = state.ctx.jobs.submit(spec, meta).await?;
    state.corpora.evict(&file_name, &corpus_id);
    tracing::info!(job_id = %job.id, corpus_id = %corpus_id, "scheduled corpus build");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateCorpusResponse {
            job_id: job.id,
            corpus_id,
        }),
    ))
}

// ============ GET /jobs/{id} ============

#[derive(Serialize)]
struct JobResponse {
    id: String,
    kind: String,
    status: JobStatus,
    meta: Metadata,
    error: Option<String>,
}

async fn handle_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state.ctx.jobs.queue().fetch_job(&id).await?;
    Ok(Json(JobResponse {
        kind: job.spec.kind().to_string(),
        id: job.id,
        status: job.status,
        meta: job.meta,
        error: job.error,
    }))
}

// ============ GET /corpus/{file} ============

#[derive(Serialize)]
struct CorporaResponse {
    corpora: Vec<CorpusSummary>,
}

async fn handle_list_corpora(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Json<CorporaResponse>, AppError> {
    require_upload(&state, &file)?;
    let corpora = available_corpora(&state.ctx.storage, &file).map_err(|e| internal(e.to_string()))?;
    Ok(Json(CorporaResponse { corpora }))
}

// ============ GET /corpus/{file}/{corpus_id} ============

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: usize,
    #[serde(default = "default_per_page")]
    per_page: usize,
}

fn default_per_page() -> usize {
    20
}

#[derive(Serialize)]
struct CorpusPage {
    corpus_id: String,
    info: CorpusInfo,
    page: usize,
    per_page: usize,
    documents: Vec<Document>,
}

async fn handle_view_corpus(
    State(state): State<AppState>,
    Path((file, corpus_id)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<CorpusPage>, AppError> {
    let per_page = query.per_page.clamp(1, MAX_PER_PAGE);
    let reader = state
        .corpora
        .get(&state.ctx.storage, &file, &corpus_id)
        .map_err(|e| bad_request(e.to_string()))?
        .ok_or_else(|| not_found(format!("corpus {} not found for {}", corpus_id, file)))?;

    let page = query.page;
    let (info, documents) = tokio::task::spawn_blocking(move || {
        let mut reader = reader
            .lock()
            .map_err(|_| internal("corpus reader lock poisoned"))?;
        Ok::<_, AppError>((reader.info().clone(), reader.page(page, per_page)))
    })
    .await
    .map_err(|e| internal(e.to_string()))??;

    Ok(Json(CorpusPage {
        corpus_id,
        info,
        page,
        per_page,
        documents,
    }))
}

// ============ DELETE /corpus/{file}/{corpus_id} ============

async fn handle_delete_corpus(
    State(state): State<AppState>,
    Path((file, corpus_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed =
        delete_corpus(&state.ctx.storage, &file, &corpus_id).map_err(|e| bad_request(e.to_string()))?;
    state.corpora.evict(&file, &corpus_id);
    if !removed {
        return Err(not_found(format!("corpus {} not found for {}", corpus_id, file)));
    }
    Ok(Json(serde_json::json!({ "deleted": true, "corpus_id": corpus_id })))
}
