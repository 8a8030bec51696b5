//! HTTP surface for published attachments
//!
//! Routes:
//! - GET /files/:file_id - Download a published attachment
//! - GET /health - Liveness check (also starts the cleanup loop)
//! - GET /cleanup/status - Cleanup task state
//!
//! Any other path gets the same 404 body as an unknown file.

use crate::cleanup::{CleanupTaskManager, CleanupTaskState};
use crate::error::{AttachmentServerError, AttachmentServerResult};
use crate::file_id::FileId;
use crate::registry::{AttachmentRegistry, Clock};
use crate::storage::StorageDirectory;
use axum::{
    body::Body,
    extract::{rejection::PathRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const FALLBACK_FILENAME: &str = "download";

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct FileServerState {
    pub registry: Arc<AttachmentRegistry>,
    pub storage: Arc<StorageDirectory>,
    pub clock: Arc<dyn Clock>,
    pub cleanup: Arc<CleanupTaskManager>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub cleanup_running: bool,
}

/// Build the file server routes
pub fn router(state: FileServerState) -> Router {
    Router::new()
        .route("/files/:file_id", get(serve_file))
        .route("/health", get(health))
        .route("/cleanup/status", get(cleanup_status))
        .fallback(unavailable)
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: FileServerState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("File server listening on {}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Download a published attachment.
///
/// GET /files/:file_id
///
/// Malformed, unknown, expired and concurrently deleted files all produce
/// the same 404. The identifier is validated before any lookup.
async fn serve_file(
    State(state): State<FileServerState>,
    raw_id: Result<Path<String>, PathRejection>,
) -> AttachmentServerResult<Response> {
    let raw_id = match raw_id {
        Ok(Path(raw_id)) => raw_id,
        Err(rejection) => {
            debug!("Rejected file path: {}", rejection);
            return Err(AttachmentServerError::invalid_id(String::new()));
        }
    };

    let Some(id) = FileId::parse(&raw_id) else {
        return Err(AttachmentServerError::invalid_id(raw_id));
    };

    let record = state
        .registry
        .get_live(&id, state.clock.now())
        .ok_or(AttachmentServerError::FileUnavailable)?;

    let data = match state.storage.read(&record.stored_path).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            debug!("File {} vanished before it could be read", id);
            return Err(AttachmentServerError::FileUnavailable);
        }
        Err(e) => {
            error!("Failed to read file {}: {}", id, e);
            return Err(AttachmentServerError::storage("Failed to read stored file"));
        }
    };

    let content_type = HeaderValue::from_str(&record.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&record.original_filename),
        )
        .header(header::CONTENT_LENGTH, data.len())
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(Body::from(data))
        .map_err(|e| AttachmentServerError::internal(format!("Failed to build response: {}", e)))
}

/// Unmatched paths, such as `/files/` or `/files/a/b`
async fn unavailable() -> AttachmentServerError {
    AttachmentServerError::FileUnavailable
}

/// GET /health
async fn health(State(state): State<FileServerState>) -> Json<HealthResponse> {
    let cleanup_running = state.cleanup.ensure_started();

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cleanup_running,
    })
}

/// GET /cleanup/status
async fn cleanup_status(State(state): State<FileServerState>) -> Json<CleanupTaskState> {
    Json(state.cleanup.status())
}

/// `attachment; filename="..."` with the name reduced to safe header text
pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", sanitize_filename(filename))
}

/// Replace anything that could break out of a quoted header value or be
/// read as a path. Non-ASCII is replaced too since plain `filename=` is
/// latin-1 at best.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_ascii_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.' || c == '_') {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}
