//! Shared relay state and child-process bookkeeping.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use tokio::sync::mpsc;

use onair_common::relay::{RelayConfig, RelayMode};

/// Capacity of the pump-to-writer channel; one chunk is one pump read.
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Pump read size. Chunks stay under the kernel's atomic pipe write limit.
pub const PUMP_CHUNK_SIZE: usize = 32 * 1024;

/// State shared across all relay tasks.
pub struct RelayState {
    /// URL of this channel's loop ingest on the media server. The loop
    /// pump always pulls this; failover always lands here.
    pub loop_url: String,
    /// Loopback media-server path the transcoder publishes the clean feed to.
    pub clean_url: String,
    pub ms_api_url: String,
    pub pipe_path: PathBuf,

    /// Current desired configuration, replaced wholesale on `/update`.
    pub config: Mutex<RelayConfig>,
    /// Which pump copies into the stream channel. Read on every chunk.
    mode: RwLock<RelayMode>,
    /// Single producer side of the pump→writer channel, cloned per pump.
    pub stream_tx: mpsc::Sender<Vec<u8>>,

    /// Process-group ids of the long-lived children, for signalling.
    pub loop_pump_pid: Mutex<Option<i32>>,
    pub primary_pump_pid: Mutex<Option<i32>>,
    pub transcoder_pid: Mutex<Option<i32>>,
    /// Bumped whenever a new primary pump is started so a superseded pump
    /// task can tell it no longer owns the primary slot.
    pub primary_generation: AtomicU64,

    /// Live distributor table plus per-destination failure counters,
    /// guarded together.
    pub distributors: Mutex<DistributorTable>,
}

#[derive(Default)]
pub struct DistributorTable {
    /// Destination URL → running distributor, if any.
    pub running: HashMap<String, DistributorHandle>,
    pub failure_counts: HashMap<String, u32>,
}

pub struct DistributorHandle {
    pub pid: Option<i32>,
    pub running: bool,
}

impl RelayState {
    pub fn new(
        loop_url: String,
        clean_url: String,
        ms_api_url: String,
        pipe_path: PathBuf,
        stream_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            loop_url,
            clean_url,
            ms_api_url,
            pipe_path,
            config: Mutex::new(RelayConfig::default()),
            mode: RwLock::new(RelayMode::Loop),
            stream_tx,
            loop_pump_pid: Mutex::new(None),
            primary_pump_pid: Mutex::new(None),
            transcoder_pid: Mutex::new(None),
            primary_generation: AtomicU64::new(0),
            distributors: Mutex::new(DistributorTable::default()),
        }
    }

    pub fn mode(&self) -> RelayMode {
        *self.mode.read().expect("mode lock poisoned")
    }

    /// Flip the muxer mode. This is the entire switch: the pump that was
    /// active stops copying on its next read, the new one starts.
    pub fn switch_mode(&self, mode: RelayMode) {
        *self.mode.write().expect("mode lock poisoned") = mode;
        tracing::info!(?mode, "muxer mode");
    }

    pub fn bump_primary_generation(&self) -> u64 {
        self.primary_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_primary_generation(&self) -> u64 {
        self.primary_generation.load(Ordering::SeqCst)
    }

    /// Internal data-plane failover: the active primary feed is gone, so
    /// point the muxer back at the always-running loop pump. Does not
    /// signal the controller; the reconciler observes independently.
    pub fn trigger_failover(&self, reason: &str) {
        if self.mode() == RelayMode::Loop {
            return;
        }
        tracing::warn!(reason, "failover: switching to running loop feed");
        self.switch_mode(RelayMode::Loop);
        let mut config = self.config.lock().expect("config lock poisoned");
        config.source_url = self.loop_url.clone();
    }
}

/// SIGKILL an entire process group.
pub fn kill_group(pid: i32) {
    // Children are spawned with process_group(0), so -pid addresses the
    // whole group including any ffmpeg grandchildren.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

/// SIGTERM an entire process group (graceful distributor removal).
pub fn term_group(pid: i32) {
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> RelayState {
        let (tx, _rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        RelayState::new(
            "rtmp://ms:1935/live/alpha".into(),
            "rtmp://ms:1935/live/alpha-clean".into(),
            "http://ms:1985".into(),
            PathBuf::from("/tmp/test.pipe"),
            tx,
        )
    }

    #[test]
    fn starts_in_loop_mode() {
        let state = test_state();
        assert_eq!(state.mode(), RelayMode::Loop);
    }

    #[test]
    fn failover_is_noop_while_on_loop() {
        let state = test_state();
        state.config.lock().unwrap().source_url = "rtmp://ms:1935/live/alpha".into();
        state.trigger_failover("test");
        assert_eq!(state.mode(), RelayMode::Loop);
    }

    #[test]
    fn failover_from_primary_rewrites_source() {
        let state = test_state();
        state.config.lock().unwrap().source_url = "rtmp://ms:1935/live/alpha-primary".into();
        state.switch_mode(RelayMode::Primary);

        state.trigger_failover("pump exit");

        assert_eq!(state.mode(), RelayMode::Loop);
        assert_eq!(state.config.lock().unwrap().source_url, state.loop_url);
    }

    #[test]
    fn primary_generation_is_monotonic() {
        let state = test_state();
        let g1 = state.bump_primary_generation();
        let g2 = state.bump_primary_generation();
        assert!(g2 > g1);
        assert_eq!(state.current_primary_generation(), g2);
    }
}
