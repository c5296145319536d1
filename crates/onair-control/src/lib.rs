//! onair control plane.
//!
//! Single binary that runs:
//! - the reconciler loop driving every channel toward its desired state
//! - the supervisor owning per-channel loop-publisher and relay children
//! - media-server webhooks (publish/unpublish authentication, takeover)
//! - the admin REST API for the dashboard
//! - the media library watcher/optimizer

pub mod api;
pub mod config;
pub mod controller;
pub mod db;
pub mod logbuf;
pub mod media;
pub mod ms;
pub mod reconciler;
pub mod state;
pub mod store;
pub mod supervisor;
