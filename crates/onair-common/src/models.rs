//! Data models for the onair platform.
//!
//! These types represent the database entities and are shared between the
//! controller (which owns them) and the API layer (which serializes subsets
//! of them to the dashboard).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Source selection ────────────────────────────────────────────────

/// Which ingest is logically carrying a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Primary,
    Loop,
    None,
}

impl Source {
    /// Wire encoding used in the database and the legacy dashboard API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Primary => "PRIMARY",
            Source::Loop => "LOOP",
            Source::None => "NONE",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIMARY" => Ok(Source::Primary),
            "LOOP" => Ok(Source::Loop),
            "NONE" | "" => Ok(Source::None),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Reconciler-derived lifecycle phase of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    Disabled,
    LoopOnly,
    PrimaryActive,
    Cooldown,
}

// ── Channel ─────────────────────────────────────────────────────────

/// The unit of broadcasting: one primary ingest, one looping backup
/// ingest, and a fan-out of downstream destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i32,
    pub slug: String,
    pub display_name: String,
    pub enabled: bool,
    pub loop_enabled: bool,
    /// Whether a live primary may preempt the loop automatically.
    pub primary_override_enabled: bool,
    pub auto_restart_loop: bool,
    /// Gate auto-preemption on a stable-up primary history instead of a
    /// single sample.
    pub primary_preempt_requires_stability: bool,
    pub failover_timeout_seconds: i32,
    /// Persisted copy of the active source; the in-memory map is
    /// authoritative between ticks.
    pub active_source: Source,
    /// Relative path under the media directory fed to the loop publisher.
    pub loop_source_file: String,
    pub encoding: EncodingProfile,
    /// Empty means source resolution.
    pub output_resolution: String,
    /// Decrypted ingest credentials. Empty when decryption failed.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub primary_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub loop_token: String,
    /// Runtime status derived from the media server, not stored.
    pub status: ChannelStatus,
    pub bitrate_kbps: i32,
    pub uptime: String,
    pub destinations: Vec<Destination>,
    /// Stream name the primary publisher was actually detected on
    /// (`{slug}-primary`, or the token when used as the path).
    #[serde(skip)]
    pub primary_stream_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Live,
    Loop,
    Down,
}

/// Per-channel encoding parameters for the relay's clean feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    /// GOP length in seconds.
    pub keyframe_interval: i32,
    /// 0 selects the platform default.
    pub video_bitrate_kbps: i32,
    pub audio_bitrate_kbps: i32,
}

pub const DEFAULT_VIDEO_BITRATE_KBPS: i32 = 4500;
pub const DEFAULT_AUDIO_BITRATE_KBPS: i32 = 128;
pub const DEFAULT_KEYFRAME_INTERVAL: i32 = 2;

impl EncodingProfile {
    /// Resolve zero/negative fields to platform defaults.
    pub fn resolved(&self) -> EncodingProfile {
        EncodingProfile {
            keyframe_interval: if self.keyframe_interval > 0 {
                self.keyframe_interval
            } else {
                DEFAULT_KEYFRAME_INTERVAL
            },
            video_bitrate_kbps: if self.video_bitrate_kbps > 0 {
                self.video_bitrate_kbps
            } else {
                DEFAULT_VIDEO_BITRATE_KBPS
            },
            audio_bitrate_kbps: if self.audio_bitrate_kbps > 0 {
                self.audio_bitrate_kbps
            } else {
                DEFAULT_AUDIO_BITRATE_KBPS
            },
        }
    }
}

// ── Destination ─────────────────────────────────────────────────────

/// A downstream RTMP target owned by a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: i32,
    pub channel_id: i32,
    pub name: String,
    pub target_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    pub enabled: bool,
    pub status: DestinationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationStatus {
    Connected,
    Disconnected,
    Error,
}

impl DestinationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationStatus::Connected => "CONNECTED",
            DestinationStatus::Disconnected => "DISCONNECTED",
            DestinationStatus::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for DestinationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECTED" => Ok(DestinationStatus::Connected),
            "DISCONNECTED" | "" => Ok(DestinationStatus::Disconnected),
            "ERROR" => Ok(DestinationStatus::Error),
            other => Err(format!("unknown destination status: {other}")),
        }
    }
}

impl Destination {
    /// Full publish URL: the stream key, when present, is appended as a
    /// path segment.
    pub fn publish_url(&self) -> String {
        match self.stream_key.as_deref() {
            Some(key) if !key.is_empty() => {
                if self.target_url.ends_with('/') {
                    format!("{}{key}", self.target_url)
                } else {
                    format!("{}/{key}", self.target_url)
                }
            }
            _ => self.target_url.clone(),
        }
    }
}

// ── User ────────────────────────────────────────────────────────────

/// A platform user (admin, operator, or viewer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Operator,
    Viewer,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Operator => write!(f, "operator"),
            UserRole::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "operator" => Ok(UserRole::Operator),
            "viewer" | "" => Ok(UserRole::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// ── Audit ───────────────────────────────────────────────────────────

/// Append-only record of a state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Logs ────────────────────────────────────────────────────────────

/// One entry in the in-memory ring buffer behind `GET /api/logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub component: String,
    pub message: String,
}

// ── Health ──────────────────────────────────────────────────────────

/// Aggregated health of one dependency, reported by `/api/health/services`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub latency_ms: i64,
    pub uptime: String,
    pub last_check: DateTime<Utc>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn source_round_trips_through_wire_encoding() {
        for src in [Source::Primary, Source::Loop, Source::None] {
            assert_eq!(Source::from_str(src.as_str()).unwrap(), src);
        }
    }

    #[test]
    fn empty_source_defaults_to_none() {
        assert_eq!(Source::from_str("").unwrap(), Source::None);
    }

    #[test]
    fn encoding_profile_zero_fields_resolve_to_defaults() {
        let profile = EncodingProfile {
            keyframe_interval: 0,
            video_bitrate_kbps: 0,
            audio_bitrate_kbps: 0,
        };
        let resolved = profile.resolved();
        assert_eq!(resolved.keyframe_interval, DEFAULT_KEYFRAME_INTERVAL);
        assert_eq!(resolved.video_bitrate_kbps, DEFAULT_VIDEO_BITRATE_KBPS);
        assert_eq!(resolved.audio_bitrate_kbps, DEFAULT_AUDIO_BITRATE_KBPS);
    }

    #[test]
    fn encoding_profile_explicit_fields_survive() {
        let profile = EncodingProfile {
            keyframe_interval: 4,
            video_bitrate_kbps: 6000,
            audio_bitrate_kbps: 192,
        };
        assert_eq!(profile.resolved(), profile);
    }

    #[test]
    fn publish_url_appends_stream_key() {
        let dest = Destination {
            id: 1,
            channel_id: 1,
            name: "yt".into(),
            target_url: "rtmp://a.rtmp.example.com/live2".into(),
            stream_key: Some("abcd-efgh".into()),
            enabled: true,
            status: DestinationStatus::Disconnected,
        };
        assert_eq!(
            dest.publish_url(),
            "rtmp://a.rtmp.example.com/live2/abcd-efgh"
        );
    }

    #[test]
    fn publish_url_handles_trailing_slash_and_missing_key() {
        let mut dest = Destination {
            id: 1,
            channel_id: 1,
            name: "tw".into(),
            target_url: "rtmp://live.example.tv/app/".into(),
            stream_key: Some("key1".into()),
            enabled: true,
            status: DestinationStatus::Disconnected,
        };
        assert_eq!(dest.publish_url(), "rtmp://live.example.tv/app/key1");

        dest.stream_key = None;
        assert_eq!(dest.publish_url(), "rtmp://live.example.tv/app/");
    }
}
