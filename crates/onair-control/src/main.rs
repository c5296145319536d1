//! onair controller daemon.

use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use onair_common::vault::TokenVault;

use onair_control::config::{Config, DEV_ENCRYPTION_KEY};
use onair_control::state::AppState;
use onair_control::{api, db, media, reconciler, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    tracing::info!(
        ms = %config.ms_api_url,
        interval = ?config.check_interval,
        "onair-control starting"
    );

    if config.encryption_key == DEV_ENCRYPTION_KEY {
        tracing::warn!("ENCRYPTION_KEY not set — using the development key");
    }
    // An unusable key is fatal: nothing downstream can run without the
    // credential vault.
    let vault = TokenVault::from_hex_key(&config.encryption_key)
        .map_err(|e| anyhow::anyhow!("invalid ENCRYPTION_KEY: {e}"))?;

    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;
    store::ensure_default_org(&pool).await?;

    let state = AppState::new(pool, config.clone(), vault);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Task 1: reconciler loop ─────────────────────────────────
    let reconciler_handle = tokio::spawn(reconciler::run(state.clone(), shutdown_rx.clone()));

    // ── Task 2: media optimizer sweep ───────────────────────────
    tokio::spawn(media::run_optimizer(state.clone(), shutdown_rx.clone()));

    // ── Router ──────────────────────────────────────────────────
    let app = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest("/api", api::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr: SocketAddr = config.listen_addr.parse()?;
    tracing::info!("onair-control listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }

    // Stop the tick loop, let the in-flight tick finish, then take every
    // supervised child down with it.
    let _ = shutdown_tx.send(true);
    let _ = reconciler_handle.await;
    state.supervisor().shutdown();
    state.pool().close().await;

    tracing::info!("onair-control stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn ready(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    if sqlx::query("SELECT 1").execute(state.pool()).await.is_err() {
        return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(serde_json::json!({"status": "ready"})))
}
