//! Channel management endpoints.
//!
//! GET    /api/channels               — list channels with live status
//! POST   /api/channels               — create a channel
//! GET    /api/channels/{id}          — channel detail
//! PUT    /api/channels/{id}          — update settings
//! DELETE /api/channels/{id}          — delete (destinations cascade)
//! GET    /api/channels/{id}/destinations
//! POST   /api/channels/{id}/{action} — start | stop | restart | enable |
//!                                      disable | switch-to-loop |
//!                                      switch-to-primary

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use onair_common::models::{Channel, ChannelStatus, Destination, Source};

use crate::api::error::ApiError;
use crate::ms::MsStream;
use crate::state::AppState;
use crate::store::{self, ChannelUpdate};
use crate::supervisor::{loop_child_name, relay_child_name};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_channels).post(create_channel))
        .route(
            "/{id}",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/{id}/destinations", get(list_channel_destinations))
        .route("/{id}/{action}", post(channel_action))
}

/// Fill the observed fields from the live stream map and the in-memory
/// source map.
fn enrich(state: &AppState, ch: &mut Channel, streams: &HashMap<String, MsStream>) {
    // The in-memory map reflects switches faster than the store.
    ch.active_source = state.controller().active_source(&ch.slug);

    let live = streams
        .get(&ch.slug)
        .filter(|s| s.loop_live())
        .or_else(|| {
            streams
                .get(&format!("{}-primary", ch.slug))
                .filter(|s| s.primary_live())
        });

    match live {
        Some(stream) => {
            ch.status = ChannelStatus::Live;
            ch.bitrate_kbps = stream.kbps.recv_30s;
            let hours = stream.live_ms / 3_600_000;
            let minutes = (stream.live_ms % 3_600_000) / 60_000;
            ch.uptime = format!("{hours}h {minutes}m");
        }
        None if ch.enabled => ch.status = ChannelStatus::Loop,
        None => ch.status = ChannelStatus::Down,
    }
}

// ── List / Detail ───────────────────────────────────────────────────

async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<Channel>>, ApiError> {
    let mut channels = store::load_channels(state.pool(), state.vault())
        .await
        .map_err(ApiError::from_db)?;
    let streams = state.ms().fetch_streams().await.unwrap_or_default();
    for ch in &mut channels {
        enrich(&state, ch, &streams);
    }
    Ok(Json(channels))
}

async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Channel>, ApiError> {
    let mut ch = store::load_channel(state.pool(), state.vault(), id)
        .await
        .map_err(ApiError::from_db)?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;
    let streams = state.ms().fetch_streams().await.unwrap_or_default();
    enrich(&state, &mut ch, &streams);
    Ok(Json(ch))
}

// ── Create ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateChannelRequest {
    slug: String,
    display_name: String,
    #[serde(default)]
    loop_source_file: String,
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct CreateChannelResponse {
    id: i32,
    slug: String,
    primary_token: String,
    loop_token: String,
}

fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

async fn create_channel(
    State(state): State<AppState>,
    Json(body): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<CreateChannelResponse>), ApiError> {
    if !valid_slug(&body.slug) {
        return Err(ApiError::bad_request(
            "slug must be lowercase letters, digits, '-' or '_'",
        ));
    }
    if body.display_name.is_empty() {
        return Err(ApiError::bad_request("display_name required"));
    }

    let created = store::create_channel(
        state.pool(),
        state.vault(),
        &body.slug,
        &body.display_name,
        &body.loop_source_file,
        body.enabled,
    )
    .await
    .map_err(|e| match e.downcast::<sqlx::Error>() {
        Ok(db) => ApiError::from_db(db),
        Err(other) => ApiError::internal(other.to_string()),
    })?;

    state.logs().info(
        "api",
        format!("created channel {} ({})", body.slug, created.id),
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateChannelResponse {
            id: created.id,
            slug: body.slug,
            primary_token: created.primary_token,
            loop_token: created.loop_token,
        }),
    ))
}

// ── Update / Delete ─────────────────────────────────────────────────

async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<ChannelUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = store::update_channel(state.pool(), id, &body)
        .await
        .map_err(ApiError::from_db)?;
    if rows == 0 {
        return Err(ApiError::not_found("channel not found"));
    }
    state
        .logs()
        .info("api", format!("updated settings for channel {id}"));
    Ok(Json(serde_json::json!({"status": "updated"})))
}

async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let ch = store::load_channel(state.pool(), state.vault(), id)
        .await
        .map_err(ApiError::from_db)?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;

    state.supervisor().ensure_stopped(&loop_child_name(&ch.slug));
    state
        .supervisor()
        .ensure_stopped(&relay_child_name(&ch.slug));

    store::delete_channel(state.pool(), id)
        .await
        .map_err(ApiError::from_db)?;

    state
        .logs()
        .info("api", format!("deleted channel {} ({id})", ch.slug));
    Ok(StatusCode::OK)
}

// ── Embedded destinations ───────────────────────────────────────────

async fn list_channel_destinations(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Destination>>, ApiError> {
    let dests = store::destinations_for_channel(state.pool(), id)
        .await
        .map_err(ApiError::from_db)?;
    Ok(Json(dests))
}

// ── Actions ─────────────────────────────────────────────────────────

async fn channel_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(i32, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ch = store::load_channel(state.pool(), state.vault(), id)
        .await
        .map_err(ApiError::from_db)?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;
    let slug = ch.slug.clone();
    let loop_name = loop_child_name(&slug);

    match action.as_str() {
        "start" => {
            state
                .logs()
                .info("api", format!("starting loop for channel {slug}"));
            store::set_loop_enabled(state.pool(), id, true)
                .await
                .map_err(ApiError::from_db)?;
            let mut ch = ch;
            ch.loop_enabled = true;
            state.supervisor().ensure_loop_running(&ch);
            Ok(Json(
                serde_json::json!({"status": "started", "channel": slug}),
            ))
        }
        "stop" => {
            state
                .logs()
                .info("api", format!("stopping loop for channel {slug}"));
            state.supervisor().ensure_stopped(&loop_name);
            Ok(Json(
                serde_json::json!({"status": "stopped", "channel": slug}),
            ))
        }
        "restart" => {
            state
                .logs()
                .info("api", format!("restarting loop for channel {slug}"));
            state.supervisor().ensure_stopped(&loop_name);
            tokio::time::sleep(Duration::from_millis(500)).await;
            state.supervisor().ensure_loop_running(&ch);
            Ok(Json(
                serde_json::json!({"status": "restarted", "channel": slug}),
            ))
        }
        "enable" => {
            store::set_channel_enabled(state.pool(), id, true)
                .await
                .map_err(ApiError::from_db)?;
            state.logs().info("api", format!("enabled channel {slug}"));
            Ok(Json(
                serde_json::json!({"status": "enabled", "channel": slug}),
            ))
        }
        "disable" => {
            store::set_channel_enabled(state.pool(), id, false)
                .await
                .map_err(ApiError::from_db)?;
            state.supervisor().ensure_stopped(&loop_name);
            state.logs().info("api", format!("disabled channel {slug}"));
            Ok(Json(
                serde_json::json!({"status": "disabled", "channel": slug}),
            ))
        }
        "switch-to-loop" => {
            store::update_active_source_by_id(state.pool(), id, Source::Loop)
                .await
                .map_err(ApiError::from_db)?;
            // Pin the loop until the primary goes away.
            state.controller().set_active_source(&slug, Source::Loop);
            state.controller().set_manual_override(&slug);
            state.logs().info(
                "switch",
                format!("channel {slug} switched to LOOP (manual override active)"),
            );
            audit_switch(&state, &slug, Source::Loop).await;
            Ok(Json(
                serde_json::json!({"status": "switched", "source": "LOOP", "channel": slug}),
            ))
        }
        "switch-to-primary" => {
            store::update_active_source_by_id(state.pool(), id, Source::Primary)
                .await
                .map_err(ApiError::from_db)?;
            state.controller().set_active_source(&slug, Source::Primary);
            state.controller().clear_manual_override(&slug);
            state
                .logs()
                .info("switch", format!("channel {slug} switched to PRIMARY (manual)"));
            audit_switch(&state, &slug, Source::Primary).await;
            Ok(Json(
                serde_json::json!({"status": "switched", "source": "PRIMARY", "channel": slug}),
            ))
        }
        _ => Err(ApiError::not_found("action not found")),
    }
}

async fn audit_switch(state: &AppState, slug: &str, source: Source) {
    if let Err(e) = store::append_audit(
        state.pool(),
        "MANUAL_SWITCH",
        "channel",
        slug,
        serde_json::json!({"source": source.as_str()}),
        None,
        None,
    )
    .await
    {
        state.logs().error("audit", format!("append failed: {e}"));
    }
}
