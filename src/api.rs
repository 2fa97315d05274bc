//! REST API server for the anomaly analysis service
//!
//! Exposes the analysis pipeline and the stored history over HTTP and serves
//! the static frontend.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::analysis::{AnalysisService, AnalysisUpload};
use crate::config::Config;
use crate::error::AnalysisError;
use crate::models::UploadedFile;
use crate::Result;

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self);
        } else {
            warn!(status = status.as_u16(), "Request rejected: {}", self);
        }

        (status, Json(ApiResponse::error(self.public_message()))).into_response()
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AnalysisService>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::success(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// =============================
/// Analysis Endpoint
/// =============================

async fn process_query(
    State(state): State<ApiState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse>> {
    let upload = read_upload(multipart).await?;
    info!(
        files = upload.files.len(),
        thread_id = ?upload.thread_id,
        "Received analysis upload"
    );

    let response = state.service.process(upload).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Decode the `prompt`, `thread_id` and repeated `files` form fields
async fn read_upload(mut multipart: Multipart) -> Result<AnalysisUpload> {
    let mut upload = AnalysisUpload::default();

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "prompt" => upload.prompt = field.text().await.map_err(invalid_form)?,
            "thread_id" => {
                let raw = field.text().await.map_err(invalid_form)?;
                upload.thread_id = parse_thread_id(&raw)?;
            }
            "files" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(invalid_form)?;
                upload.files.push(UploadedFile {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            other => warn!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(upload)
}

fn invalid_form(e: axum::extract::multipart::MultipartError) -> AnalysisError {
    AnalysisError::InputValidation(format!("Invalid form data: {}", e.body_text()))
}

fn parse_thread_id(raw: &str) -> Result<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| AnalysisError::InputValidation(format!("Invalid thread_id: {}", raw)))
}

/// =============================
/// History Endpoints
/// =============================

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

const MAX_HISTORY_LIMIT: i64 = 500;

async fn history(
    State(state): State<ApiState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiResponse>> {
    let limit = params.limit.clamp(1, MAX_HISTORY_LIMIT);
    let offset = params.offset.max(0);

    let page = state.service.store().list_threads(limit, offset).await?;
    Ok(Json(ApiResponse::success(page)))
}

async fn get_thread(
    State(state): State<ApiState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse>> {
    let thread_id = path_thread_id(&raw_id)?;

    match state.service.store().load_thread(thread_id).await? {
        Some(detail) => Ok(Json(ApiResponse::success(detail))),
        None => Err(AnalysisError::NotFound("Thread not found.".to_string())),
    }
}

async fn delete_thread(
    State(state): State<ApiState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse>> {
    let thread_id = path_thread_id(&raw_id)?;

    if !state.service.store().delete_thread(thread_id).await? {
        return Err(AnalysisError::NotFound("Thread not found.".to_string()));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "thread_id": thread_id,
        "deleted": true,
    }))))
}

fn path_thread_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AnalysisError::InputValidation(format!("Invalid thread id: {}", raw)))
}

/// =============================
/// Router
/// =============================

/// Room for multipart framing and the text fields on top of the file limit,
/// so an oversized upload still reaches the size check and gets a clean 400
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn create_router(service: Arc<AnalysisService>, config: &Config) -> Router {
    let state = ApiState { service };
    let body_limit = usize::try_from(config.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    let api = Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/process_query",
            post(process_query).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/history", get(history))
        .route("/api/thread/:id", get(get_thread).delete(delete_thread))
        .with_state(state);

    api.route_service("/", ServeFile::new(config.static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(router: Router, address: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!("API Server listening on http://{}", address);

    axum::serve(listener, router).await?;

    Ok(())
}
