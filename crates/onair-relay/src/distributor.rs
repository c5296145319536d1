//! Per-destination distributors.
//!
//! One encoder child per destination pulls the clean feed with copy
//! semantics and republishes it. Each destination has its own exponential
//! backoff: exits before 60 s of uptime increment a failure counter and
//! the next start sleeps `failures * 2 s` (capped); a stable run resets
//! the counter. Removing a destination kills its process group and purges
//! its counter.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::state::{term_group, DistributorHandle, RelayState};

/// Uptime after which a run counts as stable and resets the counter.
const STABLE_UPTIME: Duration = Duration::from_secs(60);

/// Upper bound on the backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before the next start attempt for a destination.
pub fn backoff_delay(failures: u32) -> Duration {
    (Duration::from_secs(2) * failures).min(MAX_BACKOFF)
}

fn distributor_command(clean_url: &str, dest_url: &str) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .args(["-loglevel", "warning"])
        .args(["-i", clean_url])
        .args(["-c", "copy"])
        .args(["-f", "flv"])
        .arg(dest_url)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0)
        .kill_on_drop(true);
    cmd
}

/// Reconcile the running distributor set against the desired URL list.
pub fn manage_distributors(state: &Arc<RelayState>, desired: &[String]) {
    let mut table = state.distributors.lock().expect("distributor lock poisoned");

    // Remove distributors no longer wanted.
    let stale: Vec<String> = table
        .running
        .keys()
        .filter(|url| !desired.contains(url))
        .cloned()
        .collect();
    for url in stale {
        if let Some(handle) = table.running.remove(&url) {
            if let Some(pid) = handle.pid {
                term_group(pid);
            }
        }
        table.failure_counts.remove(&url);
        tracing::info!(url = %url, "distributor removed");
    }

    // Start distributors for new destinations.
    for url in desired {
        if !table.running.contains_key(url) {
            tracing::info!(url = %url, "starting distributor");
            table.running.insert(
                url.clone(),
                DistributorHandle {
                    pid: None,
                    running: false,
                },
            );
            spawn_distributor(state.clone(), url.clone());
        }
    }
}

/// Whether `url` is in the current desired destination set.
fn still_desired(state: &RelayState, url: &str) -> bool {
    let config = state.config.lock().expect("config lock poisoned");
    config.destinations.iter().any(|d| d == url)
}

fn spawn_distributor(state: Arc<RelayState>, url: String) {
    tokio::spawn(async move {
        loop {
            let failures = {
                let table = state.distributors.lock().expect("distributor lock poisoned");
                table.failure_counts.get(&url).copied().unwrap_or(0)
            };
            if failures > 0 {
                tokio::time::sleep(backoff_delay(failures)).await;
            }

            // The set may have changed while we were backing off.
            if !still_desired(&state, &url) {
                let mut table = state.distributors.lock().expect("distributor lock poisoned");
                table.running.remove(&url);
                return;
            }

            let started = Instant::now();
            let mut child = match distributor_command(&state.clean_url, &url).spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "distributor spawn failed");
                    let mut table = state.distributors.lock().expect("distributor lock poisoned");
                    *table.failure_counts.entry(url.clone()).or_insert(0) += 1;
                    continue;
                }
            };

            {
                let mut table = state.distributors.lock().expect("distributor lock poisoned");
                match table.running.get_mut(&url) {
                    Some(handle) => {
                        handle.pid = child.id().map(|p| p as i32);
                        handle.running = true;
                    }
                    // Removed while spawning: kill and bail.
                    None => {
                        let _ = child.start_kill();
                        return;
                    }
                }
            }

            let _ = child.wait().await;

            {
                let mut table = state.distributors.lock().expect("distributor lock poisoned");
                if let Some(handle) = table.running.get_mut(&url) {
                    handle.running = false;
                    handle.pid = None;
                }
                if started.elapsed() > STABLE_UPTIME {
                    table.failure_counts.insert(url.clone(), 0);
                } else {
                    *table.failure_counts.entry(url.clone()).or_insert(0) += 1;
                }
            }

            if !still_desired(&state, &url) {
                let mut table = state.distributors.lock().expect("distributor lock poisoned");
                table.running.remove(&url);
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_then_caps() {
        assert_eq!(backoff_delay(0), Duration::ZERO);
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(5), Duration::from_secs(10));
        assert_eq!(backoff_delay(40), MAX_BACKOFF);
    }
}
