//! System surfaces: config, logs, audit, health and status.
//!
//! GET  /api/config          — system config entries
//! PUT  /api/config          — update one entry
//! GET  /api/active-sources  — real-time in-memory source map
//! GET  /api/system/status   — aggregate platform status
//! GET  /api/health/services — dependency health with latencies
//! GET  /api/logs            — ring-buffered structured logs
//! GET  /api/metrics         — process resource snapshot
//! GET  /api/audit-logs      — recent audit entries

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use onair_common::models::{AuditLogEntry, LogEntry, ServiceHealth, ServiceStatus, Source};

use crate::api::error::ApiError;
use crate::reconciler::channel_phase;
use crate::state::AppState;
use crate::store;
use crate::supervisor::loop_child_name;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/active-sources", get(active_sources))
        .route("/system/status", get(system_status))
        .route("/health/services", get(services_health))
        .route("/logs", get(logs))
        .route("/metrics", get(metrics))
        .route("/audit-logs", get(audit_logs))
}

// ── Config ──────────────────────────────────────────────────────────

async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let entries = store::list_config(state.pool())
        .await
        .map_err(ApiError::from_db)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|(key, value, description)| {
                serde_json::json!({
                    "key": key,
                    "value": value,
                    "description": description,
                })
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct PutConfigRequest {
    key: String,
    value: serde_json::Value,
}

async fn put_config(
    State(state): State<AppState>,
    Json(body): Json<PutConfigRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.key.is_empty() {
        return Err(ApiError::bad_request("key required"));
    }
    store::upsert_config(state.pool(), &body.key, &body.value)
        .await
        .map_err(ApiError::from_db)?;
    state
        .logs()
        .info("api", format!("updated config {}", body.key));
    Ok(Json(serde_json::json!({"status": "updated"})))
}

// ── Active sources ──────────────────────────────────────────────────

async fn active_sources(State(state): State<AppState>) -> Json<HashMap<String, String>> {
    let sources = state
        .controller()
        .all_active_sources()
        .into_iter()
        .map(|(slug, source)| (slug, source.as_str().to_string()))
        .collect();
    Json(sources)
}

// ── System status ───────────────────────────────────────────────────

async fn system_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let streams = state.ms().fetch_streams().await.unwrap_or_default();
    let channels = store::load_channels(state.pool(), state.vault())
        .await
        .map_err(ApiError::from_db)?;

    let total_bitrate: i32 = streams.values().map(|s| s.kbps.recv_30s).sum();

    let mut live = 0usize;
    let mut on_loop = 0usize;
    for ch in &channels {
        let source = state.controller().active_source(&ch.slug);
        if !ch.enabled {
            continue;
        }
        if source == Source::Primary {
            live += 1;
        } else {
            on_loop += 1;
        }
    }

    Ok(Json(serde_json::json!({
        "status": "online",
        "uptime_s": state.uptime().as_secs(),
        "active_streams": streams.len(),
        "total_bitrate": total_bitrate,
        "live_channels": live,
        "loop_channels": on_loop,
        "total_channels": channels.len(),
        "database": "connected",
        "memory_used_mb": mem_used_mb(),
    })))
}

// ── Service health ──────────────────────────────────────────────────

async fn services_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut services = Vec::new();
    let uptime = format!("{}s", state.uptime().as_secs());

    // Media server
    let start = Instant::now();
    let ms_result = state.ms().fetch_streams().await;
    services.push(ServiceHealth {
        name: "Media Server".into(),
        status: if ms_result.is_ok() {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Down
        },
        latency_ms: start.elapsed().as_millis() as i64,
        uptime: uptime.clone(),
        last_check: Utc::now(),
        details: match &ms_result {
            Ok(streams) => format!("{} streams published", streams.len()),
            Err(e) => e.to_string(),
        },
    });

    // Store
    let start = Instant::now();
    let db_result = sqlx::query("SELECT 1").execute(state.pool()).await;
    services.push(ServiceHealth {
        name: "PostgreSQL".into(),
        status: if db_result.is_ok() {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Down
        },
        latency_ms: start.elapsed().as_millis() as i64,
        uptime: uptime.clone(),
        last_check: Utc::now(),
        details: match &db_result {
            Ok(_) => "connected, responding".into(),
            Err(e) => e.to_string(),
        },
    });

    // Controller itself
    services.push(ServiceHealth {
        name: "Controller".into(),
        status: ServiceStatus::Healthy,
        latency_ms: 0,
        uptime: uptime.clone(),
        last_check: Utc::now(),
        details: format!("memory {} MB", mem_used_mb()),
    });

    // Per-channel loop publishers
    if let Ok(channels) = store::load_channels(state.pool(), state.vault()).await {
        for ch in channels {
            if !ch.enabled || !ch.loop_enabled {
                continue;
            }
            let name = loop_child_name(&ch.slug);
            let (status, details, child_uptime) = match state.supervisor().child_status(&name) {
                Some((true, up)) => {
                    let source = state.controller().active_source(&ch.slug);
                    let phase = channel_phase(&ch, false);
                    (
                        ServiceStatus::Healthy,
                        format!("running, source {source}, phase {phase:?}"),
                        format!("{}s", up.as_secs()),
                    )
                }
                Some((false, _)) => (ServiceStatus::Degraded, "exited".into(), "0s".into()),
                None => (ServiceStatus::Down, "child not found".into(), "0s".into()),
            };
            services.push(ServiceHealth {
                name: format!("Loop Publisher ({})", ch.display_name),
                status,
                latency_ms: 0,
                uptime: child_uptime,
                last_check: Utc::now(),
                details,
            });
        }
    }

    Json(serde_json::json!({ "services": services }))
}

// ── Logs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LogsQuery {
    level: Option<String>,
    limit: Option<usize>,
}

async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries: Vec<LogEntry> = state
        .logs()
        .tail(query.level.as_deref(), query.limit.unwrap_or(100));
    Json(serde_json::json!({ "logs": entries }))
}

// ── Metrics ─────────────────────────────────────────────────────────

async fn metrics() -> Json<serde_json::Value> {
    let (cpu, mem_used_mb, mem_total_mb) = scan_system_stats();
    Json(serde_json::json!({
        "cpu_usage": cpu,
        "memory_used_mb": mem_used_mb,
        "memory_total_mb": mem_total_mb,
    }))
}

// ── Audit log ───────────────────────────────────────────────────────

async fn audit_logs(State(state): State<AppState>) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    let entries = store::recent_audit(state.pool(), 100)
        .await
        .map_err(ApiError::from_db)?;
    Ok(Json(entries))
}

// ── System stats ────────────────────────────────────────────────────

fn scan_system_stats() -> (f32, u64, u64) {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_cpu_all();
    sys.refresh_memory();

    let cpu = sys.global_cpu_usage();
    let mem_used_mb = sys.used_memory() / 1_048_576;
    let mem_total_mb = sys.total_memory() / 1_048_576;
    (cpu, mem_used_mb, mem_total_mb)
}

fn mem_used_mb() -> u64 {
    scan_system_stats().1
}
