//! Reconciliation loop.
//!
//! Every tick: load desired state from the store, observe the media
//! server once, then drive each channel's children and relay
//! configuration toward agreement. Errors never cross channels and never
//! abort the loop — a failed store read skips the tick, a failed MS fetch
//! reconciles against an empty stream map, which decays every health
//! history toward down.

use std::collections::HashMap;

use tokio::sync::watch;

use onair_common::models::{Channel, ChannelPhase, Destination, DestinationStatus, Source};

use crate::controller::health_key;
use crate::ms::MsStream;
use crate::state::AppState;
use crate::store;
use crate::supervisor::{loop_child_name, relay_child_name, RelayEnsure};

/// Run the reconciler until shutdown. The first pass runs immediately.
pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(interval = ?state.config().check_interval, "reconciler starting");
    reconcile(&state).await;

    let mut interval = tokio::time::interval(state.config().check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => reconcile(&state).await,
            _ = shutdown.changed() => {
                tracing::info!("reconciler stopping");
                return;
            }
        }
    }
}

pub async fn reconcile(state: &AppState) {
    let channels = match store::load_channels(state.pool(), state.vault()).await {
        Ok(channels) => channels,
        Err(e) => {
            state
                .logs()
                .error("reconciler", format!("failed to load channels: {e}"));
            return;
        }
    };

    let streams = match state.ms().fetch_streams().await {
        Ok(streams) => streams,
        Err(e) => {
            state
                .logs()
                .warn("reconciler", format!("failed to fetch MS streams: {e}"));
            HashMap::new()
        }
    };

    for ch in channels {
        reconcile_channel(state, ch, &streams).await;
    }
}

pub async fn reconcile_channel(
    state: &AppState,
    mut ch: Channel,
    streams: &HashMap<String, MsStream>,
) {
    let ctrl = state.controller();
    let sup = state.supervisor();
    let loop_name = loop_child_name(&ch.slug);

    if !ch.enabled {
        sup.ensure_stopped(&loop_name);
        reconcile_destinations(state, &ch, false).await;
        return;
    }

    // Primary stream resolution: the conventional `{slug}-primary` name,
    // with a fallback for operators who used the raw token as the path.
    let mut primary_name = format!("{}-primary", ch.slug);
    let mut primary_stream = streams.get(&primary_name);
    if primary_stream.is_none() && !ch.primary_token.is_empty() {
        if let Some(stream) = streams.get(&ch.primary_token) {
            primary_stream = Some(stream);
            primary_name = ch.primary_token.clone();
        }
    }
    ch.primary_stream_name = primary_name;

    let loop_up = streams.get(&ch.slug).is_some_and(|s| s.loop_live());
    let primary_up = primary_stream.is_some_and(|s| s.primary_live());

    let loop_key = health_key(&ch.slug, "loop");
    let primary_key = health_key(&ch.slug, "primary");
    ctrl.push_health(&loop_key, loop_up);
    ctrl.push_health(&primary_key, primary_up);

    // The in-memory map is authoritative between ticks, but a persisted
    // disagreement (webhook or another instance wrote the store) wins.
    let mut current = ctrl.active_source(&ch.slug);
    if ch.active_source != Source::None && ch.active_source != current {
        ctrl.set_active_source(&ch.slug, ch.active_source);
        current = ch.active_source;
    }

    // The operator's "stay on loop" intent is consumed by the primary
    // going away; the next primary connection may preempt again.
    let mut manual_override = ctrl.has_manual_override(&ch.slug);
    if !primary_up && manual_override {
        ctrl.clear_manual_override(&ch.slug);
        manual_override = false;
        state.logs().info(
            "override",
            format!("channel {}: cleared manual loop override (primary gone)", ch.slug),
        );
    }

    let primary_stable = ctrl.is_stable(&primary_key, true);
    if should_preempt(&ch, primary_up, current, manual_override, primary_stable) {
        ctrl.set_active_source(&ch.slug, Source::Primary);
        current = Source::Primary;
        state.logs().info(
            "switch",
            format!("channel {} auto-switched to PRIMARY", ch.slug),
        );

        // Persist and audit off the tick path.
        let pool = state.pool().clone();
        let (id, slug) = (ch.id, ch.slug.clone());
        tokio::spawn(async move {
            if let Err(e) = store::update_active_source_by_id(&pool, id, Source::Primary).await {
                tracing::error!(slug, error = %e, "failed to persist active source");
            }
            if let Err(e) = store::append_audit(
                &pool,
                "AUTO_SWITCH",
                "channel",
                &slug,
                serde_json::json!({"source": "PRIMARY"}),
                None,
                None,
            )
            .await
            {
                tracing::error!(slug, error = %e, "failed to audit auto-switch");
            }
        });
    }

    // There is no automatic logical fallback to LOOP: the relay's data
    // plane already carries continuity, and flipping here would oscillate
    // when the primary reconnects within the pump-restart window. The
    // watchdog only surfaces the stale state.
    if current == Source::Primary {
        if ctrl.is_stable(&primary_key, false) {
            if ctrl.watchdog_should_warn(&ch.slug) {
                state.logs().warn(
                    "watchdog",
                    format!(
                        "channel {}: logical source is PRIMARY but primary ingest is stable-down",
                        ch.slug
                    ),
                );
            }
        } else if primary_up {
            ctrl.watchdog_reset(&ch.slug);
        }
    }

    ch.active_source = current;

    // While a takeover cooldown holds, the loop child must stay stopped
    // so the incoming primary can claim the ingest.
    let timeout = if ch.failover_timeout_seconds >= 1 {
        std::time::Duration::from_secs(ch.failover_timeout_seconds as u64)
    } else {
        state.config().failover_timeout
    };
    if ctrl.in_cooldown(&ch.slug, timeout) {
        sup.ensure_stopped(&loop_name);
        reconcile_destinations(state, &ch, primary_up || loop_up).await;
        return;
    }

    if ch.loop_enabled {
        sup.ensure_loop_running(&ch);
    } else {
        sup.ensure_stopped(&loop_name);
    }

    let stream_active = primary_up || loop_up || ch.loop_enabled;
    reconcile_destinations(state, &ch, stream_active).await;
}

/// Drive the relay child and destination statuses.
async fn reconcile_destinations(state: &AppState, ch: &Channel, stream_active: bool) {
    let relay_name = relay_child_name(&ch.slug);
    let enabled: Vec<Destination> = ch
        .destinations
        .iter()
        .filter(|d| d.enabled)
        .cloned()
        .collect();

    if !stream_active || enabled.is_empty() {
        state.supervisor().ensure_stopped(&relay_name);
        for dest in &ch.destinations {
            if dest.status != DestinationStatus::Disconnected {
                if let Err(e) = store::update_destination_status(
                    state.pool(),
                    dest.id,
                    DestinationStatus::Disconnected,
                )
                .await
                {
                    tracing::error!(dest = dest.id, error = %e, "failed to update destination status");
                }
            }
        }
        return;
    }

    match state.supervisor().ensure_relay_running(ch, &enabled).await {
        RelayEnsure::Updated => {
            for dest in &enabled {
                if dest.status != DestinationStatus::Connected {
                    if let Err(e) = store::update_destination_status(
                        state.pool(),
                        dest.id,
                        DestinationStatus::Connected,
                    )
                    .await
                    {
                        tracing::error!(dest = dest.id, error = %e, "failed to update destination status");
                    }
                }
            }
        }
        RelayEnsure::Created | RelayEnsure::Unchanged | RelayEnsure::Failed => {}
    }
}

/// Auto-preemption rule: a robustly-live primary takes over unless the
/// operator pinned the loop or preemption is disabled for the channel.
pub fn should_preempt(
    ch: &Channel,
    primary_up: bool,
    current: Source,
    manual_override: bool,
    primary_stable: bool,
) -> bool {
    if !ch.primary_override_enabled || !primary_up || current == Source::Primary || manual_override
    {
        return false;
    }
    if ch.primary_preempt_requires_stability && !primary_stable {
        return false;
    }
    true
}

/// Lifecycle phase of a channel, derived for the status surfaces.
pub fn channel_phase(ch: &Channel, in_cooldown: bool) -> ChannelPhase {
    if !ch.enabled {
        ChannelPhase::Disabled
    } else if in_cooldown {
        ChannelPhase::Cooldown
    } else if ch.active_source == Source::Primary {
        ChannelPhase::PrimaryActive
    } else {
        ChannelPhase::LoopOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onair_common::models::{ChannelStatus, EncodingProfile};

    fn channel(source: Source) -> Channel {
        Channel {
            id: 1,
            slug: "alpha".into(),
            display_name: "Alpha".into(),
            enabled: true,
            loop_enabled: true,
            primary_override_enabled: true,
            auto_restart_loop: true,
            primary_preempt_requires_stability: false,
            failover_timeout_seconds: 10,
            active_source: source,
            loop_source_file: "loop.mp4".into(),
            encoding: EncodingProfile {
                keyframe_interval: 2,
                video_bitrate_kbps: 0,
                audio_bitrate_kbps: 128,
            },
            output_resolution: String::new(),
            primary_token: String::new(),
            loop_token: String::new(),
            status: ChannelStatus::Down,
            bitrate_kbps: 0,
            uptime: String::new(),
            destinations: Vec::new(),
            primary_stream_name: String::new(),
        }
    }

    // ─── Preemption ─────────────────────────────────────────────────

    #[test]
    fn live_primary_preempts_loop() {
        let ch = channel(Source::Loop);
        assert!(should_preempt(&ch, true, Source::Loop, false, false));
    }

    #[test]
    fn preemption_is_single_sample_by_default() {
        // primary_stable=false must not block the switch unless the
        // channel opted into stability gating.
        let ch = channel(Source::Loop);
        assert!(should_preempt(&ch, true, Source::Loop, false, false));
    }

    #[test]
    fn stability_gate_blocks_until_history_agrees() {
        let mut ch = channel(Source::Loop);
        ch.primary_preempt_requires_stability = true;
        assert!(!should_preempt(&ch, true, Source::Loop, false, false));
        assert!(should_preempt(&ch, true, Source::Loop, false, true));
    }

    #[test]
    fn manual_override_suppresses_preemption() {
        let ch = channel(Source::Loop);
        assert!(!should_preempt(&ch, true, Source::Loop, true, true));
    }

    #[test]
    fn no_preemption_when_already_primary() {
        let ch = channel(Source::Primary);
        assert!(!should_preempt(&ch, true, Source::Primary, false, true));
    }

    #[test]
    fn no_preemption_when_disabled_or_down() {
        let mut ch = channel(Source::Loop);
        assert!(!should_preempt(&ch, false, Source::Loop, false, true));
        ch.primary_override_enabled = false;
        assert!(!should_preempt(&ch, true, Source::Loop, false, true));
    }

    // ─── Phase Derivation ───────────────────────────────────────────

    #[test]
    fn phase_transitions() {
        let mut ch = channel(Source::Loop);
        assert_eq!(channel_phase(&ch, false), ChannelPhase::LoopOnly);
        assert_eq!(channel_phase(&ch, true), ChannelPhase::Cooldown);

        ch.active_source = Source::Primary;
        assert_eq!(channel_phase(&ch, false), ChannelPhase::PrimaryActive);

        ch.enabled = false;
        assert_eq!(channel_phase(&ch, false), ChannelPhase::Disabled);
    }
}
