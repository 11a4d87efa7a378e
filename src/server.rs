//! HTTP request layer.
//!
//! Thin axum handlers over [`RagPipeline`], [`HistoryStore`] and the
//! cleanup routines. Handlers only parse input, call the core and map its
//! errors to status codes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Multipart upload: `file`, optional `session_id` |
//! | `POST` | `/ask` | Form: `query`, optional `session_id`, `session_name` |
//! | `GET`  | `/history` | Every stored exchange |
//! | `GET`  | `/history/{session_id}` | One session's exchanges |
//! | `DELETE` | `/history/{session_id}` | Drop one session's exchanges |
//! | `DELETE` | `/sessions/{session_id}` | Drop folder, index records and history |
//! | `DELETE` | `/cleanup-unused-sessions?dry_run=` | Remove sessions without history |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "No source data found for session ID: s1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `invalid_document` (422), `internal` (500).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::FormRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::cleanup::{self, CleanupReport, ForgottenSession};
use crate::config::Config;
use crate::error::RagError;
use crate::history::{default_session_name, ChatRecord, HistoryStore};
use crate::models::IngestReport;
use crate::pipeline::RagPipeline;

/// Largest accepted request body (uploads included).
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub history: Arc<HistoryStore>,
    pub cleanup_log: Arc<PathBuf>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>, history: Arc<HistoryStore>, cleanup_log: PathBuf) -> Self {
        Self {
            pipeline,
            history,
            cleanup_log: Arc::new(cleanup_log),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ask", post(handle_ask))
        .route("/history", get(handle_all_history))
        .route(
            "/history/{session_id}",
            get(handle_history).delete(handle_delete_history),
        )
        .route("/sessions/{session_id}", delete(handle_delete_session))
        .route("/cleanup-unused-sessions", delete(handle_cleanup))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Open the stores named in `config` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(RagPipeline::from_config(config).await?);
    let history = Arc::new(
        HistoryStore::open(&config.history.path)
            .await
            .with_context(|| format!("Failed to open history at {}", config.history.path.display()))?,
    );
    let state = AppState::new(
        Arc::clone(&pipeline),
        Arc::clone(&history),
        config.storage.cleanup_log.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(addr = %config.server.bind, "server listening");
    println!("listening on http://{}", config.server.bind);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    pipeline.close().await;
    history.close().await;
    tracing::info!("server stopped");
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        if err.is_not_found() {
            AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            }
        } else if err.is_bad_request() {
            bad_request(message)
        } else if matches!(err, RagError::LoadFailure { .. }) {
            AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "invalid_document",
                message,
            }
        } else {
            tracing::error!(error = %message, "request failed");
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message,
            }
        }
    }
}

/// Blank form fields count as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============ POST /ingest ============

async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut session_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
                upload = Some((filename, bytes.to_vec()));
            }
            Some("session_id") => {
                session_id = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            _ => {}
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| bad_request("missing 'file' field"))?;
    let session_id = non_blank(session_id);
    let report = state
        .pipeline
        .ingest_upload(bytes, &filename, session_id.as_deref())
        .await?;
    Ok(Json(report))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskForm {
    query: String,
    session_id: Option<String>,
    session_name: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    session_id: String,
    session_name: String,
    answer: String,
    sources: Vec<String>,
}

/// Answers within the given session, or from the global index when none is
/// given. The exchange is recorded under the session id returned.
async fn handle_ask(
    State(state): State<AppState>,
    form: Result<Form<AskForm>, FormRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Form(form) = form.map_err(|rejection| bad_request(rejection.body_text()))?;
    if form.query.trim().is_empty() {
        return Err(bad_request("Query is required"));
    }
    let requested = non_blank(form.session_id);
    let session_name =
        non_blank(form.session_name).unwrap_or_else(|| default_session_name(&form.query));

    let answer = state
        .pipeline
        .answer(&form.query, requested.as_deref())
        .await?;

    let session_id = requested.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state
        .history
        .save_chat(
            &session_id,
            &form.query,
            &answer.answer,
            &answer.sources,
            Some(&session_name),
        )
        .await?;

    Ok(Json(AskResponse {
        session_id,
        session_name,
        answer: answer.answer,
        sources: answer.sources,
    }))
}

// ============ /history ============

async fn handle_all_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatRecord>>, AppError> {
    Ok(Json(state.history.get_all_history().await?))
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ChatRecord>>, AppError> {
    Ok(Json(state.history.get_history(&session_id).await?))
}

#[derive(Serialize)]
struct DeleteHistoryResponse {
    message: String,
    deleted: u64,
}

async fn handle_delete_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteHistoryResponse>, AppError> {
    let deleted = state.history.delete_history(&session_id).await?;
    Ok(Json(DeleteHistoryResponse {
        message: format!("Deleted {} records for session {}", deleted, session_id),
        deleted,
    }))
}

// ============ DELETE /sessions/{session_id} ============

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ForgottenSession>, AppError> {
    let forgotten = cleanup::forget_session(&state.pipeline, &state.history, &session_id).await?;
    Ok(Json(forgotten))
}

// ============ DELETE /cleanup-unused-sessions ============

#[derive(Deserialize)]
struct CleanupParams {
    #[serde(default)]
    dry_run: bool,
}

async fn handle_cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<CleanupReport>, AppError> {
    let report = cleanup::cleanup_unused_sessions(
        &state.pipeline,
        &state.history,
        &state.cleanup_log,
        params.dry_run,
    )
    .await?;
    Ok(Json(report))
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
