//! onair relay daemon.
//!
//! One instance per channel, supervised by the controller. Holds the muxer
//! pipe open for its whole lifetime, keeps the loop pump and transcoder
//! hot, and exposes the control API the reconciler drives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use onair_common::relay::{RelayConfig, DEFAULT_CONTROL_PORT};
use onair_relay::state::{kill_group, RelayState, STREAM_CHANNEL_CAPACITY};
use onair_relay::{api, mux, pump, watch};

/// onair per-channel relay daemon.
#[derive(Parser, Debug)]
#[command(name = "onair-relay", about = "onair per-channel relay")]
struct Cli {
    /// Control API listen port.
    #[arg(long, env = "CONTROL_PORT", default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Media server streams API base URL.
    #[arg(long, env = "MS_API_URL", default_value = "http://ms:1985")]
    ms_api_url: String,

    /// This channel's loop ingest URL on the media server.
    #[arg(long, env = "LOOP_STREAM_URL")]
    loop_stream_url: String,

    /// Loopback path the clean feed is published to.
    #[arg(long, env = "CLEAN_STREAM_URL")]
    clean_stream_url: String,

    /// Muxer FIFO path.
    #[arg(long, env = "PIPE_PATH", default_value = "/tmp/onair-relay.pipe")]
    pipe_path: PathBuf,

    /// Bootstrap source URL (reconfigured via POST /update afterwards).
    #[arg(long, env = "INITIAL_SOURCE_URL")]
    initial_source_url: Option<String>,

    /// Bootstrap destination URL.
    #[arg(long, env = "INITIAL_DESTINATION")]
    initial_destination: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(
        loop_url = %cli.loop_stream_url,
        clean_url = %cli.clean_stream_url,
        port = cli.control_port,
        "onair-relay starting"
    );

    // The relay cannot run without its pipe.
    let pipe = mux::create_and_hold_pipe(&cli.pipe_path)?;

    let (stream_tx, stream_rx) = mpsc::channel::<Vec<u8>>(STREAM_CHANNEL_CAPACITY);
    let state = Arc::new(RelayState::new(
        cli.loop_stream_url,
        cli.clean_stream_url,
        cli.ms_api_url,
        cli.pipe_path.clone(),
        stream_tx,
    ));

    tokio::task::spawn_blocking(move || mux::pipe_writer_loop(pipe, stream_rx));
    tokio::spawn(pump::run_loop_pump(state.clone()));
    tokio::spawn(watch::run(state.clone()));

    // Bootstrap configuration from the supervisor's environment; the
    // controller posts the full config on its next tick.
    if let Some(source_url) = cli.initial_source_url {
        let destinations = cli.initial_destination.into_iter().collect();
        api::apply_config(
            &state,
            RelayConfig {
                source_url,
                destinations,
                ..RelayConfig::default()
            },
        );
    }

    let addr: SocketAddr = ([0, 0, 0, 0], cli.control_port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("control API listening on {addr}");

    let server = axum::serve(listener, api::router(state.clone()));
    tokio::select! {
        result = server => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }

    cleanup(&state);
    Ok(())
}

/// Kill every child process group and remove the pipe file.
fn cleanup(state: &RelayState) {
    for slot in [
        &state.loop_pump_pid,
        &state.primary_pump_pid,
        &state.transcoder_pid,
    ] {
        if let Some(pid) = slot.lock().expect("pid lock poisoned").take() {
            kill_group(pid);
        }
    }

    let table = state.distributors.lock().expect("distributor lock poisoned");
    for handle in table.running.values() {
        if let Some(pid) = handle.pid {
            kill_group(pid);
        }
    }

    let _ = std::fs::remove_file(&state.pipe_path);
    tracing::info!("relay stopped");
}
