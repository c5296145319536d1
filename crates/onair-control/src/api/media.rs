//! Media library endpoints.
//!
//! GET    /api/media            — list playable files
//! GET    /api/media/status     — per-file detail with optimizer progress
//! POST   /api/media/upload     — multipart upload (10 GiB cap)
//! GET    /api/media/{filename} — serve a file
//! DELETE /api/media/{filename} — delete a file

use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::api::error::ApiError;
use crate::media::{self, MediaFileInfo};
use crate::state::AppState;

const UPLOAD_LIMIT: usize = 10 * 1024 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_media))
        .route("/status", get(media_status))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/{filename}", get(serve_file).delete(delete_file))
}

async fn list_media(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state
        .media()
        .list()
        .map(Json)
        .map_err(|e| ApiError::internal(format!("failed to read media directory: {e}")))
}

async fn media_status(State(state): State<AppState>) -> Result<Json<Vec<MediaFileInfo>>, ApiError> {
    state
        .media()
        .status()
        .map(Json)
        .map_err(|e| ApiError::internal(format!("failed to read media directory: {e}")))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(|f| f.rsplit(['/', '\\']).next().unwrap_or(f).to_string())
            .ok_or_else(|| ApiError::bad_request("filename required"))?;
        media::validate_filename(&filename).map_err(ApiError::bad_request)?;

        let dst_path = state.media().file_path(&filename);
        std::fs::create_dir_all(state.media().dir())
            .map_err(|e| ApiError::internal(format!("failed to create media directory: {e}")))?;

        // Concurrent uploads share one directory; an existing file means
        // another upload (or a kept original) already claimed the name.
        if dst_path.exists() {
            return Err(ApiError::conflict("a file with this name already exists"));
        }

        let mut dst = tokio::fs::File::create(&dst_path)
            .await
            .map_err(|e| ApiError::internal(format!("failed to create file: {e}")))?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(format!("upload aborted: {e}")))?
        {
            if let Err(e) = dst.write_all(&chunk).await {
                let _ = tokio::fs::remove_file(&dst_path).await;
                return Err(ApiError::internal(format!("failed to save file: {e}")));
            }
        }
        dst.flush()
            .await
            .map_err(|e| ApiError::internal(format!("failed to save file: {e}")))?;

        state.logs().info("api", format!("uploaded file {filename}"));
        return Ok(Json(
            serde_json::json!({"status": "uploaded", "file": filename}),
        ));
    }

    Err(ApiError::bad_request("missing 'file' field"))
}

async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    media::validate_filename(&filename).map_err(ApiError::bad_request)?;
    let path = state.media().file_path(&filename);
    if !path.is_file() {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(ServeFile::new(path)
        .oneshot(request)
        .await
        .into_response())
}

async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<StatusCode, ApiError> {
    media::validate_filename(&filename).map_err(ApiError::bad_request)?;
    let path = state.media().file_path(&filename);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            // The optimization marker is meaningless without its file.
            let _ = std::fs::remove_file(state.media().file_path(&format!("{filename}.optimized")));
            state.logs().info("api", format!("deleted file {filename}"));
            Ok(StatusCode::OK)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found("file not found"))
        }
        Err(e) => Err(ApiError::internal(format!("failed to delete file: {e}"))),
    }
}
