//! Destination management endpoints.
//!
//! POST   /api/destinations              — add a destination to a channel
//! PUT    /api/destinations/{id}         — update a destination
//! DELETE /api/destinations/{id}         — remove a destination
//! POST   /api/destinations/{id}/{action} — enable | disable

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::store;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_destination))
        .route("/{id}", put(update_destination).delete(delete_destination))
        .route("/{id}/{action}", post(destination_action))
}

#[derive(Debug, Deserialize)]
struct CreateDestinationRequest {
    channel_id: i32,
    name: String,
    target_url: String,
    stream_key: Option<String>,
}

async fn create_destination(
    State(state): State<AppState>,
    Json(body): Json<CreateDestinationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.name.is_empty() || body.target_url.is_empty() {
        return Err(ApiError::bad_request("name and target_url required"));
    }
    if !body.target_url.starts_with("rtmp://") && !body.target_url.starts_with("rtmps://") {
        return Err(ApiError::bad_request("target_url must be an RTMP URL"));
    }

    let id = store::create_destination(
        state.pool(),
        body.channel_id,
        &body.name,
        &body.target_url,
        body.stream_key.as_deref(),
    )
    .await
    .map_err(|e| {
        if e.to_string().contains("foreign key") {
            ApiError::not_found("channel not found")
        } else {
            ApiError::from_db(e)
        }
    })?;

    state.logs().info(
        "api",
        format!("created destination {} for channel {}", body.name, body.channel_id),
    );
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"id": id, "status": "created"})),
    ))
}

#[derive(Debug, Deserialize)]
struct UpdateDestinationRequest {
    name: Option<String>,
    target_url: Option<String>,
    stream_key: Option<String>,
}

async fn update_destination(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateDestinationRequest>,
) -> Result<StatusCode, ApiError> {
    if body.name.is_none() && body.target_url.is_none() && body.stream_key.is_none() {
        return Err(ApiError::bad_request("no fields to update"));
    }

    let rows = store::update_destination(
        state.pool(),
        id,
        body.name.as_deref(),
        body.target_url.as_deref(),
        body.stream_key.as_deref(),
    )
    .await
    .map_err(ApiError::from_db)?;

    if rows == 0 {
        return Err(ApiError::not_found("destination not found"));
    }
    state.logs().info("api", format!("updated destination {id}"));
    Ok(StatusCode::OK)
}

async fn delete_destination(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let rows = store::delete_destination(state.pool(), id)
        .await
        .map_err(ApiError::from_db)?;
    if rows == 0 {
        return Err(ApiError::not_found("destination not found"));
    }
    state.logs().info("api", format!("deleted destination {id}"));
    Ok(StatusCode::OK)
}

async fn destination_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(i32, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match action.as_str() {
        "enable" => {
            store::set_destination_enabled(state.pool(), id, true)
                .await
                .map_err(ApiError::from_db)?;
            Ok(Json(serde_json::json!({"status": "enabled"})))
        }
        "disable" => {
            store::set_destination_enabled(state.pool(), id, false)
                .await
                .map_err(ApiError::from_db)?;
            Ok(Json(serde_json::json!({"status": "disabled"})))
        }
        _ => Err(ApiError::bad_request("unknown action")),
    }
}
