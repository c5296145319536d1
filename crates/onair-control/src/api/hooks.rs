//! Media-server webhooks and operator takeover.
//!
//! POST /api/hooks/on_publish   — authenticate a publish attempt
//! POST /api/hooks/on_unpublish — release state when a publisher leaves
//! POST /api/hooks/on_connect   — always accepted (auth happens at publish)
//! POST /api/takeover/{slug}    — operator-initiated primary takeover
//!
//! The media server treats a response body of `"0"` as accept and
//! anything else as reject.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use onair_common::models::Source;
use onair_common::vault;

use crate::state::AppState;
use crate::store::{self, ChannelAuth};
use crate::supervisor::loop_child_name;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/on_publish", post(on_publish))
        .route("/on_unpublish", post(on_unpublish))
        .route("/on_connect", post(on_connect))
}

#[derive(Debug, Deserialize)]
struct HookPayload {
    #[serde(default)]
    #[allow(dead_code)]
    action: String,
    #[serde(default)]
    stream: String,
    #[serde(default)]
    param: String,
    #[serde(default)]
    ip: String,
}

fn accept() -> Response {
    "0".into_response()
}

fn reject(msg: &'static str) -> Response {
    (StatusCode::FORBIDDEN, msg).into_response()
}

fn token_from_param(param: &str) -> &str {
    param.strip_prefix("?token=").unwrap_or(param)
}

/// Which of the channel's credentials a raw token matches. Hash
/// comparison first; decrypted plaintext as the fallback.
fn match_token(state: &AppState, auth: &ChannelAuth, token: &str) -> Option<Source> {
    let token_hash = vault::hash_token(token);
    if token_hash == auth.primary_token_hash {
        return Some(Source::Primary);
    }
    if token_hash == auth.loop_token_hash {
        return Some(Source::Loop);
    }
    let vault = state.vault();
    if let Ok(plain) = vault.open(&auth.primary_token_encrypted, &auth.primary_token_nonce) {
        if plain == token {
            return Some(Source::Primary);
        }
    }
    if let Ok(plain) = vault.open(&auth.loop_token_encrypted, &auth.loop_token_nonce) {
        if plain == token {
            return Some(Source::Loop);
        }
    }
    None
}

async fn on_publish(State(state): State<AppState>, body: String) -> Response {
    let payload: HookPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            state
                .logs()
                .error("auth", format!("publish hook unmarshal failed: {e}"));
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    let token = token_from_param(&payload.param).to_string();

    // `{slug}-primary` is the conventional primary stream name.
    let (mut stream_name, mut is_primary_stream) = match payload.stream.strip_suffix("-primary") {
        Some(base) => (base.to_string(), true),
        None => (payload.stream.clone(), false),
    };

    let auth = match store::channel_auth_by_slug(state.pool(), &stream_name).await {
        Ok(Some(auth)) => auth,
        Ok(None) => {
            // Operator may have used the raw primary token as the path.
            match store::channel_auth_by_primary_token(state.pool(), &payload.stream).await {
                Ok(Some(auth)) => {
                    is_primary_stream = true;
                    stream_name = auth.slug.clone();
                    auth
                }
                Ok(None) => {
                    state.logs().warn(
                        "auth",
                        format!("rejected unknown stream: {}", payload.stream),
                    );
                    return reject("unknown stream");
                }
                Err(e) => {
                    state.logs().error("auth", format!("lookup failed: {e}"));
                    return reject("lookup failed");
                }
            }
        }
        Err(e) => {
            state.logs().error("auth", format!("lookup failed: {e}"));
            return reject("lookup failed");
        }
    };

    let source = match match_token(&state, &auth, &token) {
        Some(source) => source,
        None => {
            state.logs().warn(
                "auth",
                format!(
                    "invalid token for stream {} from {}",
                    payload.stream, payload.ip
                ),
            );
            return reject("invalid token");
        }
    };

    // A primary stream name only accepts the primary credential.
    if is_primary_stream && source != Source::Primary {
        state.logs().warn(
            "auth",
            format!("invalid primary token for stream {}", payload.stream),
        );
        return reject("invalid token");
    }

    state.logs().info(
        "auth",
        format!(
            "accepted {source} publish for {} from {}",
            payload.stream, payload.ip
        ),
    );

    if source == Source::Primary {
        // Free the ingest immediately: stop the loop child and keep the
        // reconciler from restarting it while the takeover settles.
        state.controller().install_cooldown(&stream_name);
        let stop_state = state.clone();
        let slug = stream_name.clone();
        tokio::spawn(async move {
            stop_state.supervisor().ensure_stopped(&loop_child_name(&slug));
        });

        if let Err(e) =
            store::update_active_source_by_slug(state.pool(), &stream_name, Source::Primary).await
        {
            state
                .logs()
                .error("auth", format!("failed to persist takeover: {e}"));
        }
    }

    if let Err(e) = store::append_audit(
        state.pool(),
        "STREAM_PUBLISH",
        "channel",
        &payload.stream,
        serde_json::json!({"source": source.as_str()}),
        None,
        Some(&payload.ip),
    )
    .await
    {
        state.logs().error("audit", format!("append failed: {e}"));
    }

    accept()
}

async fn on_unpublish(State(state): State<AppState>, body: String) -> Response {
    let payload: HookPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        // Unpublish is best-effort; never block the media server on it.
        Err(_) => return accept(),
    };

    let token = token_from_param(&payload.param);
    let stream_name = payload
        .stream
        .strip_suffix("-primary")
        .unwrap_or(&payload.stream)
        .to_string();

    let Ok(Some(auth)) = store::channel_auth_by_slug(state.pool(), &stream_name).await else {
        return accept();
    };

    if match_token(&state, &auth, token) == Some(Source::Primary) {
        state.logs().info(
            "failover",
            format!("primary disconnected for {stream_name}, clearing cooldown"),
        );
        state.controller().clear_cooldown(&stream_name);

        if let Err(e) =
            store::update_active_source_by_slug(state.pool(), &stream_name, Source::Loop).await
        {
            state
                .logs()
                .error("failover", format!("failed to persist failback: {e}"));
        }

        if let Err(e) = store::append_audit(
            state.pool(),
            "STREAM_UNPUBLISH",
            "channel",
            &payload.stream,
            serde_json::json!({"source": "PRIMARY", "action": "failback_to_loop"}),
            None,
            Some(&payload.ip),
        )
        .await
        {
            state.logs().error("audit", format!("append failed: {e}"));
        }
    }

    accept()
}

/// Fires on RTMP handshake, before stream acquisition. Always accepted.
async fn on_connect() -> Response {
    accept()
}

// ── Takeover ────────────────────────────────────────────────────────

pub async fn takeover(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, crate::api::error::ApiError> {
    use crate::api::error::ApiError;

    let row: Option<(i32, i32)> = sqlx::query_as(
        "SELECT id, failover_timeout_seconds FROM channels WHERE slug = $1 AND enabled = true",
    )
    .bind(&slug)
    .fetch_optional(state.pool())
    .await
    .map_err(ApiError::from_db)?;
    let Some((id, timeout_seconds)) = row else {
        return Err(ApiError::not_found("channel not found or disabled"));
    };

    state.logs().info(
        "api",
        format!("primary takeover requested for {slug}, stopping loop child"),
    );
    state.supervisor().ensure_stopped(&loop_child_name(&slug));
    state.controller().install_cooldown(&slug);

    store::update_active_source_by_id(state.pool(), id, Source::Primary)
        .await
        .map_err(ApiError::from_db)?;

    if let Err(e) = store::append_audit(
        state.pool(),
        "PRIMARY_TAKEOVER",
        "channel",
        &slug,
        serde_json::json!({"action": "loop_stopped"}),
        None,
        None,
    )
    .await
    {
        state.logs().error("audit", format!("append failed: {e}"));
    }

    let timeout = if timeout_seconds >= 1 {
        timeout_seconds
    } else {
        state.config().failover_timeout.as_secs() as i32
    };

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!(
            "Loop stopped for channel {slug} - primary can now connect ({timeout}s window)"
        ),
        "rtmp_url": format!("{}/{slug}", state.config().public_rtmp_url),
    })))
}
