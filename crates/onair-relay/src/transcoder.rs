//! Mezzanine transcoder.
//!
//! A single always-on encoder process reads the muxer pipe and publishes a
//! normalized clean feed to a loopback media-server path. Distributors
//! subscribe only to the clean feed, so pumps switching underneath never
//! touches them. Encoding parameter changes are the one reconfiguration
//! that restarts this process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use onair_common::models::{DEFAULT_AUDIO_BITRATE_KBPS, DEFAULT_VIDEO_BITRATE_KBPS};

use crate::state::{kill_group, RelayState};

/// Assumed frame rate of the normalized feed; the GOP length in frames is
/// `keyframe_interval * FRAME_RATE`.
const FRAME_RATE: i32 = 30;

fn transcoder_command(state: &RelayState) -> Command {
    let (video_kbps, audio_kbps, keyframe_s) = {
        let config = state.config.lock().expect("config lock poisoned");
        (
            if config.video_bitrate > 0 {
                config.video_bitrate
            } else {
                DEFAULT_VIDEO_BITRATE_KBPS
            },
            if config.audio_bitrate > 0 {
                config.audio_bitrate
            } else {
                DEFAULT_AUDIO_BITRATE_KBPS
            },
            if config.keyframe_interval > 0 {
                config.keyframe_interval
            } else {
                2
            },
        )
    };
    let gop = keyframe_s * FRAME_RATE;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .args(["-loglevel", "warning"])
        .args(["-f", "mpegts"])
        .args(["-probesize", "32M"])
        .args(["-analyzeduration", "100000"])
        .arg("-i")
        .arg(&state.pipe_path)
        .args(["-c:v", "libx264"])
        .args(["-preset", "ultrafast"])
        .args(["-tune", "zerolatency"])
        .args(["-b:v", &format!("{video_kbps}k")])
        .args(["-maxrate", &format!("{video_kbps}k")])
        .args(["-bufsize", &format!("{}k", video_kbps * 2)])
        .args(["-pix_fmt", "yuv420p"])
        .args(["-g", &gop.to_string()])
        .args(["-keyint_min", &gop.to_string()])
        .args(["-sc_threshold", "0"])
        .args(["-c:a", "aac"])
        .args(["-b:a", &format!("{audio_kbps}k")])
        .args(["-ac", "2"])
        .args(["-f", "flv"])
        .arg(&state.clean_url)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0)
        .kill_on_drop(true);
    cmd
}

/// Ensure the transcoder is running; no-op when it already is.
pub fn ensure_transcoder(state: &Arc<RelayState>) {
    {
        let pid = state.transcoder_pid.lock().expect("pid lock poisoned");
        if pid.is_some() {
            return;
        }
    }

    tracing::info!(clean_url = %state.clean_url, "starting transcoder (pipe -> clean feed)");
    let mut child = match transcoder_command(state).spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(error = %e, "transcoder spawn failed");
            return;
        }
    };

    let pid = child.id().map(|p| p as i32);
    *state.transcoder_pid.lock().expect("pid lock poisoned") = pid;

    let state = state.clone();
    tokio::spawn(async move {
        let _ = child.wait().await;
        tracing::warn!("transcoder exited");
        {
            let mut slot = state.transcoder_pid.lock().expect("pid lock poisoned");
            if *slot == pid {
                *slot = None;
            } else {
                // Already replaced by a reconfiguration.
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        ensure_transcoder(&state);
    });
}

/// Kill the transcoder so the monitor restarts it with fresh encoding
/// parameters. The only reconfiguration with a visible hiccup.
pub fn restart_transcoder(state: &Arc<RelayState>) {
    let pid = state
        .transcoder_pid
        .lock()
        .expect("pid lock poisoned")
        .take();
    if let Some(pid) = pid {
        tracing::info!("restarting transcoder for new encoding parameters");
        kill_group(pid);
    }
    ensure_transcoder(state);
}
