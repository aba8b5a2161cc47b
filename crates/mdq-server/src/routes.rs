//! HTTP API: thin handlers over the queue, history, sync and settings.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use mdq_core::config::DaemonConfig;
use mdq_core::error::QueueError;
use mdq_core::history;
use mdq_core::normalize;
use mdq_core::queue::DownloadQueue;
use mdq_core::store::{Job, Settings, Store};
use mdq_core::sync::{RunOutcome, SyncAgent};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<DownloadQueue>,
    pub sync: Arc<SyncAgent>,
    pub store: Store,
}

/// Maps the error taxonomy onto HTTP statuses; internals are logged and
/// returned opaque.
struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            QueueError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            QueueError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            QueueError::InvalidState { .. } => (StatusCode::CONFLICT, self.0.to_string()),
            QueueError::Sync(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            QueueError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(state: AppState, cfg: &DaemonConfig) -> Router {
    let cors = if cfg.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/queue/add", post(add_jobs))
        .route("/api/queue/list", get(list_jobs))
        .route("/api/queue/:id", delete(remove_job))
        .route("/api/queue/retry/:id", post(retry_job))
        .route("/api/queue/redownload/:id", post(redownload_job))
        .route("/api/queue/history", get(history_page))
        .route("/api/queue/export", get(export_history))
        .route("/api/queue/import", post(import_history))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/sync/run", post(run_sync))
        .route("/api/sync/status", get(sync_status))
        .route("/api/files/resolve", post(resolve_url))
        .layer(cors)
        .with_state(state)
}

/// Clients send either a JSON array of URLs or one newline-separated
/// string (paste-a-list submission).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlList {
    Many(Vec<String>),
    Text(String),
}

impl UrlList {
    fn into_vec(self) -> Vec<String> {
        match self {
            UrlList::Many(urls) => urls,
            UrlList::Text(text) => text.lines().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddRequest {
    urls: UrlList,
}

async fn add_jobs(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.queue.submit(&req.urls.into_vec()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.queue.list().await?))
}

async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.queue.cancel_or_delete(&id).await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.queue.retry(&id).await?))
}

async fn redownload_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.queue.redownload(&id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    50
}

async fn history_page(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        history::list(&state.store, params.page, params.limit).await?,
    ))
}

async fn export_history(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = history::export(&state.store).await?;
    let date = chrono::Utc::now().format("%Y-%m-%d");
    let disposition = format!("attachment; filename=\"mdq-history-{date}.json\"");
    Ok((
        [(header::CONTENT_DISPOSITION, disposition)],
        Json(jobs),
    ))
}

async fn import_history(
    State(state): State<AppState>,
    Json(records): Json<Vec<Job>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(history::import(&state.store, &records).await?))
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.queue.settings().await)
}

async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.queue.update_settings(settings).await?))
}

async fn run_sync(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let destination = state.queue.settings().await.sync_destination;
    match state.sync.run(&destination).await? {
        RunOutcome::Started => Ok((StatusCode::ACCEPTED, Json(json!({ "started": true })))),
        RunOutcome::AlreadyRunning => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "error": "sync already running" })),
        )),
    }
}

async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sync.status().await)
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    url: String,
}

/// Resolve a share link to its effective URL. Non-short-links and
/// resolution failures pass the input through unchanged.
async fn resolve_url(Json(req): Json<ResolveRequest>) -> impl IntoResponse {
    let resolved = if normalize::is_short_link(&req.url) {
        match normalize::resolve_short_link(&req.url).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("short-link resolution failed: {e:#}");
                req.url.clone()
            }
        }
    } else {
        req.url.clone()
    };
    Json(json!({ "url": resolved }))
}
