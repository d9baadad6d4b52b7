use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use incidentqa_agent::{AskRequest, AskResponse, HealthReport};
use incidentqa_core::types::{IndexMeta, SearchRequest, SearchResponse};
use incidentqa_core::Error;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/search", post(search))
        .route("/v1/search/batch", post(search_batch))
        .route("/v1/ask", post(ask))
        .route("/v1/admin/reload", post(reload))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.orchestrator.health())
}

async fn search(State(state): State<AppState>, Json(payload): Json<SearchRequest>) -> Result<Json<SearchResponse>, ApiError> {
    let response = state.orchestrator.search(payload).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<SearchRequest>,
}

/// One entry per request, in input order. A failed query does not fail the batch.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Ok(SearchResponse),
    Err(ErrorBody),
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub responses: Vec<BatchItem>,
}

async fn search_batch(State(state): State<AppState>, Json(payload): Json<BatchRequest>) -> Json<BatchResponse> {
    let responses = state
        .orchestrator
        .search_batch(payload.requests)
        .await
        .into_iter()
        .map(|r| match r {
            Ok(resp) => BatchItem::Ok(resp),
            Err(e) => BatchItem::Err(ErrorBody { error_code: e.code().to_string(), message: e.to_string() }),
        })
        .collect();
    Json(BatchResponse { responses })
}

async fn ask(State(state): State<AppState>, Json(payload): Json<AskRequest>) -> Result<Json<AskResponse>, ApiError> {
    let response = state.orchestrator.ask(payload).await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadRequest {
    /// Defaults to the configured index directory. Anything else must resolve
    /// to a directory inside it; relative paths are taken from there.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
}

/// Accepts an empty body or a JSON [`ReloadRequest`].
async fn reload(State(state): State<AppState>, body: Bytes) -> Result<Json<IndexMeta>, ApiError> {
    let request: ReloadRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ReloadRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| Error::InvalidRequest(format!("invalid reload body: {e}")))?
    };
    let dir = resolve_reload_dir(&state.index_dir, request.index_dir.as_deref())?;
    let orchestrator = state.orchestrator.clone();
    let meta = tokio::task::spawn_blocking(move || orchestrator.reload(&dir))
        .await
        .map_err(|e| ApiError::from(Error::Operation(format!("reload task failed: {e}"))))??;
    Ok(Json(meta))
}

fn resolve_reload_dir(root: &Path, requested: Option<&Path>) -> Result<PathBuf, Error> {
    let Some(requested) = requested else { return Ok(root.to_path_buf()) };
    let root = root
        .canonicalize()
        .map_err(|e| Error::InvalidRequest(format!("configured index directory {} is not usable: {e}", root.display())))?;
    let candidate = root
        .join(requested)
        .canonicalize()
        .map_err(|e| Error::InvalidRequest(format!("index_dir {}: {e}", requested.display())))?;
    if !candidate.starts_with(&root) {
        return Err(Error::InvalidRequest(format!("index_dir {} is outside the configured index directory", requested.display())));
    }
    Ok(candidate)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::IndexUnavailable | Error::RetrievalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, body: ErrorBody { error_code: err.code().to_string(), message: err.to_string() } }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
