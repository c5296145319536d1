//! Supervisor: lifecycle of per-channel child processes.
//!
//! Two child classes exist per channel: `loop-{slug}` (the loop publisher)
//! and `relay-{slug}` (the relay daemon). Children live in the host
//! process table and are tracked in an in-memory registry carrying the
//! labels the reconciler compares against: executable path and relay
//! config hash. Every operation is idempotent — calling it again with the
//! same inputs converges without side effects.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::process::{Child, Command};

use onair_common::models::{Channel, Destination, Source};
use onair_common::relay::{self, RelayConfig};

use crate::config::Config;

/// Uptime after which a child's restart counter resets.
const STABLE_UPTIME: Duration = Duration::from_secs(60);

/// Restart counter cap; the respawn backoff is `min(count, MAX) * 2 s`.
const MAX_RESTART_BACKOFF_STEPS: u32 = 5;

pub fn loop_child_name(slug: &str) -> String {
    format!("loop-{slug}")
}

pub fn relay_child_name(slug: &str) -> String {
    format!("relay-{slug}")
}

struct ChildEntry {
    child: Child,
    exec: String,
    /// Relay config hash last acknowledged by the child; `None` until the
    /// first full configuration lands.
    config_hash: Option<String>,
    control_port: Option<u16>,
    started_at: Instant,
}

#[derive(Default)]
struct RestartState {
    count: u32,
    last_spawn: Option<Instant>,
}

/// Outcome of a relay ensure pass, used to drive destination statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnsure {
    Created,
    Updated,
    Unchanged,
    Failed,
}

pub struct Supervisor {
    cfg: Config,
    children: DashMap<String, ChildEntry>,
    restarts: DashMap<String, RestartState>,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            children: DashMap::new(),
            restarts: DashMap::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .expect("reqwest client build"),
        }
    }

    // ── Registry queries ────────────────────────────────────────────

    /// Whether the named child is currently running, and for how long.
    pub fn child_status(&self, name: &str) -> Option<(bool, Duration)> {
        let mut entry = self.children.get_mut(name)?;
        let uptime = entry.started_at.elapsed();
        let running = matches!(entry.child.try_wait(), Ok(None));
        Some((running, uptime))
    }

    // ── Loop publisher ──────────────────────────────────────────────

    /// Ensure the loop publisher for `ch` exists and runs. A live child is
    /// a no-op; a dead or missing one is reaped and respawned, subject to
    /// the restart backoff.
    pub fn ensure_loop_running(&self, ch: &Channel) {
        let name = loop_child_name(&ch.slug);

        if let Some(mut entry) = self.children.get_mut(&name) {
            if matches!(entry.child.try_wait(), Ok(None)) {
                return;
            }
            // Exited: count the failure, unless it ran long enough to be
            // considered stable.
            let stable = entry.started_at.elapsed() > STABLE_UPTIME;
            drop(entry);
            self.reap(&name);
            let mut state = self.restarts.entry(name.clone()).or_default();
            state.count = if stable { 0 } else { state.count + 1 };
        }

        if !self.spawn_allowed(&name) {
            return;
        }

        let encoding = ch.encoding.resolved();
        let target_url = self
            .cfg
            .ingest_url(&ch.slug, Some(&ch.loop_token));
        let source_file = self.cfg.media_path.join(&ch.loop_source_file);

        tracing::info!(slug = %ch.slug, "starting loop publisher");
        let mut cmd = Command::new(&self.cfg.loop_exec);
        cmd.env("RTMP_URL", &target_url)
            .env("SOURCE_FILE", &source_file)
            .env("CHANNEL_NAME", &ch.slug)
            .env("VIDEO_BITRATE", encoding.video_bitrate_kbps.to_string())
            .env("AUDIO_BITRATE", encoding.audio_bitrate_kbps.to_string())
            .env("KEYFRAME_INTERVAL", encoding.keyframe_interval.to_string())
            .env("OUTPUT_RESOLUTION", &ch.output_resolution)
            .process_group(0)
            .kill_on_drop(true);

        self.spawn_child(&name, cmd, self.cfg.loop_exec.clone(), None);
    }

    // ── Relay ───────────────────────────────────────────────────────

    /// Ingest URL matching the channel's logical source.
    pub fn relay_source_url(&self, ch: &Channel) -> String {
        let stream = if ch.active_source == Source::Primary {
            if ch.primary_stream_name.is_empty() {
                format!("{}-primary", ch.slug)
            } else {
                ch.primary_stream_name.clone()
            }
        } else {
            ch.slug.clone()
        };
        self.cfg.ingest_url(&stream, None)
    }

    /// Drive the relay child toward the desired configuration: spawn it
    /// when missing, replace it on an executable upgrade, and POST the
    /// configuration when the config hash drifts.
    pub async fn ensure_relay_running(
        &self,
        ch: &Channel,
        enabled_dests: &[Destination],
    ) -> RelayEnsure {
        let name = relay_child_name(&ch.slug);
        let encoding = ch.encoding.resolved();

        let dest_ids: Vec<i32> = enabled_dests.iter().map(|d| d.id).collect();
        let desired_hash = relay::config_hash(
            &dest_ids,
            encoding.video_bitrate_kbps,
            encoding.keyframe_interval,
            encoding.audio_bitrate_kbps,
            &ch.output_resolution,
            ch.active_source.as_str(),
        );

        let source_url = self.relay_source_url(ch);
        let dest_urls: Vec<String> = enabled_dests.iter().map(|d| d.publish_url()).collect();

        // Upgrade path: a child from an older executable is destroyed and
        // recreated.
        let mut respawn = true;
        if let Some(mut entry) = self.children.get_mut(&name) {
            let running = matches!(entry.child.try_wait(), Ok(None));
            if running && entry.exec != self.cfg.relay_exec {
                tracing::info!(slug = %ch.slug, exec = %self.cfg.relay_exec, "upgrading relay");
                drop(entry);
                self.ensure_stopped(&name);
            } else if running {
                respawn = false;
            } else {
                drop(entry);
                self.reap(&name);
            }
        }

        if respawn {
            let port = self.relay_control_port(ch.id);
            tracing::info!(slug = %ch.slug, port, "creating relay");

            let mut cmd = Command::new(&self.cfg.relay_exec);
            cmd.env("CONTROL_PORT", port.to_string())
                .env("MS_API_URL", &self.cfg.ms_api_url)
                .env("LOOP_STREAM_URL", self.cfg.ingest_url(&ch.slug, None))
                .env(
                    "CLEAN_STREAM_URL",
                    self.cfg.ingest_url(&format!("{}-clean", ch.slug), None),
                )
                .env("PIPE_PATH", format!("/tmp/onair-relay-{}.pipe", ch.slug))
                .env("INITIAL_SOURCE_URL", &source_url)
                .process_group(0)
                .kill_on_drop(true);
            if let Some(first) = dest_urls.first() {
                cmd.env("INITIAL_DESTINATION", first);
            }

            if !self.spawn_child(&name, cmd, self.cfg.relay_exec.clone(), Some(port)) {
                return RelayEnsure::Failed;
            }
            // The bootstrap environment is not the full configuration;
            // leaving the hash unset forces an update on the next tick.
            return RelayEnsure::Created;
        }

        // Config drift check against the last acknowledged hash.
        let (current_hash, port) = {
            let entry = self.children.get(&name).expect("entry exists");
            (entry.config_hash.clone(), entry.control_port)
        };
        if current_hash.as_deref() == Some(desired_hash.as_str()) {
            return RelayEnsure::Unchanged;
        }

        let payload = RelayConfig {
            source_url,
            destinations: dest_urls,
            video_bitrate: encoding.video_bitrate_kbps,
            audio_bitrate: encoding.audio_bitrate_kbps,
            keyframe_interval: encoding.keyframe_interval,
        };
        let port = port.unwrap_or(relay::DEFAULT_CONTROL_PORT);
        let url = format!("http://127.0.0.1:{port}/update");

        match self.http.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Some(mut entry) = self.children.get_mut(&name) {
                    entry.config_hash = Some(desired_hash);
                }
                RelayEnsure::Updated
            }
            // The relay may still be booting; retried next tick.
            Ok(_) | Err(_) => RelayEnsure::Failed,
        }
    }

    pub fn relay_control_port(&self, channel_id: i32) -> u16 {
        self.cfg
            .relay_port_base
            .wrapping_add(channel_id.unsigned_abs() as u16)
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Stop and unregister a child. Safe to call when it does not exist.
    pub fn ensure_stopped(&self, name: &str) {
        if let Some((_, entry)) = self.children.remove(name) {
            kill_entry(name, entry);
        }
    }

    /// Kill every supervised child (graceful shutdown).
    pub fn shutdown(&self) {
        let names: Vec<String> = self.children.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.ensure_stopped(&name);
        }
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Whether the restart backoff allows a spawn attempt now.
    fn spawn_allowed(&self, name: &str) -> bool {
        let state = self.restarts.entry(name.to_string()).or_default();
        match state.last_spawn {
            Some(last) if state.count > 0 => {
                let steps = state.count.min(MAX_RESTART_BACKOFF_STEPS);
                last.elapsed() >= Duration::from_secs(2) * steps
            }
            _ => true,
        }
    }

    /// Spawn and register a child; a conflicting registration triggers a
    /// single force-remove and retry.
    fn spawn_child(&self, name: &str, mut cmd: Command, exec: String, port: Option<u16>) -> bool {
        let child = match cmd.spawn() {
            Ok(child) => Ok(child),
            Err(first_err) => {
                tracing::warn!(name, error = %first_err, "spawn conflict, removing stale child and retrying");
                self.ensure_stopped(name);
                cmd.spawn()
            }
        };

        match child {
            Ok(child) => {
                self.children.insert(
                    name.to_string(),
                    ChildEntry {
                        child,
                        exec,
                        config_hash: None,
                        control_port: port,
                        started_at: Instant::now(),
                    },
                );
                self.restarts.entry(name.to_string()).or_default().last_spawn =
                    Some(Instant::now());
                true
            }
            Err(e) => {
                tracing::error!(name, error = %e, "failed to start child");
                let mut state = self.restarts.entry(name.to_string()).or_default();
                state.count += 1;
                state.last_spawn = Some(Instant::now());
                false
            }
        }
    }

    /// Drop a dead child from the registry and reap it off-thread.
    fn reap(&self, name: &str) {
        if let Some((_, entry)) = self.children.remove(name) {
            let mut child = entry.child;
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
    }
}

fn kill_entry(name: &str, entry: ChildEntry) {
    let mut child = entry.child;
    if let Some(pid) = child.id() {
        // Children run in their own process group; -pid takes the whole
        // group down including encoder grandchildren.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    tracing::info!(name, "child stopped");
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut cfg = Config::load();
        cfg.loop_exec = "/bin/sleep".into();
        cfg.relay_exec = "/bin/sleep".into();
        cfg.ms_rtmp_url = "rtmp://ms:1935/live".into();
        cfg.relay_port_base = 18000;
        cfg
    }

    fn channel(slug: &str, source: Source) -> Channel {
        Channel {
            id: 7,
            slug: slug.into(),
            display_name: slug.into(),
            enabled: true,
            loop_enabled: true,
            primary_override_enabled: true,
            auto_restart_loop: true,
            primary_preempt_requires_stability: false,
            failover_timeout_seconds: 10,
            active_source: source,
            loop_source_file: "loop.mp4".into(),
            encoding: onair_common::models::EncodingProfile {
                keyframe_interval: 2,
                video_bitrate_kbps: 4500,
                audio_bitrate_kbps: 128,
            },
            output_resolution: String::new(),
            primary_token: "ptok".into(),
            loop_token: "ltok".into(),
            status: onair_common::models::ChannelStatus::Down,
            bitrate_kbps: 0,
            uptime: String::new(),
            destinations: Vec::new(),
            primary_stream_name: String::new(),
        }
    }

    #[test]
    fn child_names() {
        assert_eq!(loop_child_name("alpha"), "loop-alpha");
        assert_eq!(relay_child_name("alpha"), "relay-alpha");
    }

    #[test]
    fn relay_ports_are_per_channel() {
        let sup = Supervisor::new(test_config());
        assert_eq!(sup.relay_control_port(7), 18007);
        assert_ne!(sup.relay_control_port(7), sup.relay_control_port(8));
    }

    #[test]
    fn source_url_follows_logical_source() {
        let sup = Supervisor::new(test_config());

        let ch = channel("alpha", Source::Loop);
        assert_eq!(sup.relay_source_url(&ch), "rtmp://ms:1935/live/alpha");

        let mut ch = channel("alpha", Source::Primary);
        assert_eq!(
            sup.relay_source_url(&ch),
            "rtmp://ms:1935/live/alpha-primary"
        );

        // Operator published to the raw token path.
        ch.primary_stream_name = "ptok".into();
        assert_eq!(sup.relay_source_url(&ch), "rtmp://ms:1935/live/ptok");
    }

    #[test]
    fn backoff_gates_respawns() {
        let sup = Supervisor::new(test_config());
        assert!(sup.spawn_allowed("loop-alpha"), "no history means allowed");

        {
            let mut state = sup.restarts.entry("loop-alpha".to_string()).or_default();
            state.count = 3;
            state.last_spawn = Some(Instant::now());
        }
        assert!(!sup.spawn_allowed("loop-alpha"), "3 failures => 6 s gate");

        {
            let mut state = sup.restarts.get_mut("loop-alpha").unwrap();
            state.last_spawn = Some(Instant::now() - Duration::from_secs(7));
        }
        assert!(sup.spawn_allowed("loop-alpha"));
    }

    #[tokio::test]
    async fn ensure_stopped_is_idempotent() {
        let sup = Supervisor::new(test_config());
        sup.ensure_stopped("loop-ghost");
        sup.ensure_stopped("loop-ghost");
        assert!(sup.child_status("loop-ghost").is_none());
    }

    #[tokio::test]
    async fn spawned_child_is_tracked_until_stopped() {
        let sup = Supervisor::new(test_config());

        let mut cmd = Command::new("sleep");
        cmd.arg("30").process_group(0).kill_on_drop(true);
        assert!(sup.spawn_child("loop-alpha", cmd, "sleep".into(), None));

        let (running, _) = sup.child_status("loop-alpha").expect("registered");
        assert!(running);

        sup.ensure_stopped("loop-alpha");
        assert!(sup.child_status("loop-alpha").is_none());
    }

    #[tokio::test]
    async fn dead_child_is_detected_and_respawn_is_gated() {
        let sup = Supervisor::new(test_config());

        // `true` exits immediately.
        let mut cmd = Command::new("true");
        cmd.process_group(0);
        assert!(sup.spawn_child("loop-beta", cmd, "true".into(), None));

        // Give it a moment to exit, then the status reads dead.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (running, _) = sup.child_status("loop-beta").unwrap();
        assert!(!running);

        // ensure_loop_running reaps the corpse and counts the failure;
        // the fresh spawn attempt is gated by the 2 s backoff.
        let ch = channel("beta", Source::Loop);
        sup.ensure_loop_running(&ch);
        assert_eq!(sup.restarts.get("loop-beta").unwrap().count, 1);
    }
}
