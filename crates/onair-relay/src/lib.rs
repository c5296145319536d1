//! Per-channel relay process.
//!
//! Pulls the primary and loop ingests in parallel, feeds whichever is
//! active through a held-open named pipe into a single always-on
//! transcoder, and fans the resulting clean feed out to every configured
//! destination. Switching source is pure metadata on the muxer — no pipe
//! teardown, no transcoder restart, no distributor restart.

pub mod api;
pub mod distributor;
pub mod mux;
pub mod pump;
pub mod state;
pub mod transcoder;
pub mod watch;
