//! Shared types for the onair platform.
//!
//! This crate contains:
//! - **Data models** — Channel, Destination, User, audit and health types
//! - **Token vault** — SHA-256 lookup hashes plus AES-256-GCM at-rest
//!   encryption for ingest credentials, Argon2id for user passwords
//! - **Relay protocol** — the JSON control contract between the controller
//!   and each per-channel relay process
//! - **ID generation** — prefixed UUIDv7 helpers (`usr_`, `adt_`)

pub mod ids;
pub mod models;
pub mod relay;
pub mod vault;
