//! Ingress pumps.
//!
//! Each pump is an encoder child process pulling one ingest from the media
//! server with copy semantics and emitting a transport stream on stdout.
//! Both pumps read continuously; only the one matching the muxer mode
//! copies its chunks into the stream channel. The loop pump runs forever
//! and restarts within 50–100 ms of exit. The primary pump is started on
//! demand and triggers an internal failover if it dies while active.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use onair_common::relay::RelayMode;

use crate::state::{kill_group, RelayState, PUMP_CHUNK_SIZE};

/// Build the copy-pump command for an ingest URL.
///
/// `paced` applies `-re` so the loop feed is read at native rate even when
/// the media server delivers a burst after reconnect.
fn copy_pump_command(url: &str, paced: bool) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").args(["-loglevel", "error"]);
    if paced {
        cmd.arg("-re");
    } else {
        // Primary feeds get a read timeout so a half-dead TCP session
        // surfaces as a pump exit instead of a silent stall.
        cmd.args(["-rw_timeout", "5000000"]);
    }
    cmd.args(["-i", url])
        .args(["-c", "copy"])
        .args(["-bsf:v", "h264_mp4toannexb"])
        .args(["-flush_packets", "1"])
        .args(["-f", "mpegts", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0)
        .kill_on_drop(true);
    cmd
}

/// Run the loop pump forever. Exits only when the stream channel closes
/// (process shutdown).
pub async fn run_loop_pump(state: Arc<RelayState>) {
    loop {
        tracing::info!(url = %state.loop_url, "starting loop pump");

        let mut child = match copy_pump_command(&state.loop_url, true).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, "loop pump spawn failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let pid = child.id().map(|p| p as i32);
        *state.loop_pump_pid.lock().expect("pid lock poisoned") = pid;

        let mut stdout = child.stdout.take().expect("stdout is piped");
        let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if state.mode() == RelayMode::Loop {
                if state.stream_tx.send(buf[..n].to_vec()).await.is_err() {
                    // Writer gone: shutting down.
                    return;
                }
            }
        }

        let _ = child.wait().await;
        *state.loop_pump_pid.lock().expect("pid lock poisoned") = None;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Start (or replace) the primary pump for `url`.
///
/// The previous pump's process group is killed first; a generation counter
/// lets the superseded task detect it no longer owns the primary slot so
/// its exit cannot trigger a spurious failover.
pub fn start_primary_pump(state: Arc<RelayState>, url: String) {
    let generation = state.bump_primary_generation();

    if let Some(pid) = state
        .primary_pump_pid
        .lock()
        .expect("pid lock poisoned")
        .take()
    {
        kill_group(pid);
    }

    tokio::spawn(async move {
        // Give the old process group a moment to release the ingest.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if generation != state.current_primary_generation() {
            return;
        }

        tracing::info!(url = %url, "starting primary pump");
        let mut child = match copy_pump_command(&url, false).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, "primary pump spawn failed");
                state.trigger_failover("primary spawn error");
                return;
            }
        };

        let pid = child.id().map(|p| p as i32);
        *state.primary_pump_pid.lock().expect("pid lock poisoned") = pid;

        // Make active immediately if this URL is still the configured
        // source; otherwise stay warm and wait for the mode flip.
        let is_target = {
            let config = state.config.lock().expect("config lock poisoned");
            config.source_url == url
        };
        if is_target && generation == state.current_primary_generation() {
            state.switch_mode(RelayMode::Primary);
        }

        let mut stdout = child.stdout.take().expect("stdout is piped");
        let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if generation != state.current_primary_generation() {
                break;
            }
            if state.mode() == RelayMode::Primary {
                if state.stream_tx.send(buf[..n].to_vec()).await.is_err() {
                    return;
                }
            }
        }

        let _ = child.wait().await;
        tracing::info!(url = %url, "primary pump exited");

        if generation == state.current_primary_generation() {
            *state.primary_pump_pid.lock().expect("pid lock poisoned") = None;
            if state.mode() == RelayMode::Primary {
                state.trigger_failover("primary pump exit");
            }
        }
    });
}
