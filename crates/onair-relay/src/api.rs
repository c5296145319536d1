//! Relay control API.
//!
//! `POST /update` — replace the desired configuration (idempotent)
//! `GET  /status` — report source, mode, distributor and transcoder state

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use onair_common::relay::{DistributorStatus, RelayConfig, RelayMode, RelayStatus};

use crate::distributor::manage_distributors;
use crate::pump::start_primary_pump;
use crate::state::RelayState;
use crate::transcoder::{ensure_transcoder, restart_transcoder};

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/update", post(update))
        .route("/status", get(status))
        .with_state(state)
}

async fn update(State(state): State<Arc<RelayState>>, Json(config): Json<RelayConfig>) {
    apply_config(&state, config);
}

async fn status(State(state): State<Arc<RelayState>>) -> Json<RelayStatus> {
    let source = state
        .config
        .lock()
        .expect("config lock poisoned")
        .source_url
        .clone();
    let destinations = {
        let table = state.distributors.lock().expect("distributor lock poisoned");
        table
            .running
            .iter()
            .map(|(url, handle)| DistributorStatus {
                url: url.clone(),
                running: handle.running,
            })
            .collect()
    };
    let transcoder_running = state
        .transcoder_pid
        .lock()
        .expect("pid lock poisoned")
        .is_some();

    Json(RelayStatus {
        source,
        mode: state.mode(),
        destinations,
        transcoder_running,
    })
}

/// Apply a desired configuration. Identical payloads are a no-op; a source
/// change flips the muxer (and warms the primary pump when needed); an
/// encoding change restarts the transcoder; a destination diff is
/// reconciled by the distributor table.
pub fn apply_config(state: &Arc<RelayState>, new_config: RelayConfig) {
    let (source_changed, encoding_changed, old_source) = {
        let mut config = state.config.lock().expect("config lock poisoned");
        if *config == new_config {
            return;
        }
        let source_changed = config.source_url != new_config.source_url;
        let encoding_changed = config.video_bitrate != new_config.video_bitrate
            || config.audio_bitrate != new_config.audio_bitrate
            || config.keyframe_interval != new_config.keyframe_interval;
        let old_source = std::mem::replace(&mut *config, new_config.clone()).source_url;
        (source_changed, encoding_changed, old_source)
    };

    if source_changed {
        tracing::info!(from = %old_source, to = %new_config.source_url, "source change");
        if new_config.source_url == state.loop_url {
            state.switch_mode(RelayMode::Loop);
        } else {
            start_primary_pump(state.clone(), new_config.source_url.clone());
        }
    }

    if encoding_changed {
        restart_transcoder(state);
    } else {
        ensure_transcoder(state);
    }

    manage_distributors(state, &new_config.destinations);
}
