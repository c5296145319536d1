//! Control contract between the controller and each per-channel relay.
//!
//! The relay exposes `POST /update` and `GET /status` on its control port;
//! both sides of that JSON surface live here so the supervisor and the
//! relay binary cannot drift apart.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default control port a relay listens on when the supervisor does not
/// assign one.
pub const DEFAULT_CONTROL_PORT: u16 = 8080;

/// Desired relay configuration, posted by the controller on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// RTMP URL of the ingest currently selected as the logical source.
    pub source_url: String,
    /// Full publish URLs of every enabled destination.
    pub destinations: Vec<String>,
    #[serde(default)]
    pub video_bitrate: i32,
    #[serde(default)]
    pub audio_bitrate: i32,
    #[serde(default)]
    pub keyframe_interval: i32,
}

/// Live state reported by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStatus {
    pub source: String,
    pub mode: RelayMode,
    pub destinations: Vec<DistributorStatus>,
    pub transcoder_running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorStatus {
    pub url: String,
    pub running: bool,
}

/// Which pump feeds the muxer pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMode {
    Loop,
    Primary,
}

/// Digest of everything that requires a relay reconfiguration when it
/// changes. Destination ids are sorted so list order never forces churn.
pub fn config_hash(
    dest_ids: &[i32],
    video_bitrate: i32,
    keyframe_interval: i32,
    audio_bitrate: i32,
    output_resolution: &str,
    source: &str,
) -> String {
    let mut ids: Vec<i32> = dest_ids.to_vec();
    ids.sort_unstable();
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{joined}|{video_bitrate}|{keyframe_interval}|{audio_bitrate}|{output_resolution}|{source}"
    ));
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_hash_ignores_destination_order() {
        let a = config_hash(&[3, 1, 2], 4500, 2, 128, "", "LOOP");
        let b = config_hash(&[1, 2, 3], 4500, 2, 128, "", "LOOP");
        assert_eq!(a, b);
    }

    #[test]
    fn config_hash_changes_with_source() {
        let a = config_hash(&[1], 4500, 2, 128, "", "LOOP");
        let b = config_hash(&[1], 4500, 2, 128, "", "PRIMARY");
        assert_ne!(a, b);
    }

    #[test]
    fn config_hash_changes_with_encoding() {
        let base = config_hash(&[1], 4500, 2, 128, "", "LOOP");
        assert_ne!(base, config_hash(&[1], 6000, 2, 128, "", "LOOP"));
        assert_ne!(base, config_hash(&[1], 4500, 4, 128, "", "LOOP"));
        assert_ne!(base, config_hash(&[1], 4500, 2, 192, "", "LOOP"));
        assert_ne!(base, config_hash(&[1], 4500, 2, 128, "1280x720", "LOOP"));
    }

    #[test]
    fn relay_config_json_field_names() {
        let cfg = RelayConfig {
            source_url: "rtmp://ms:1935/live/alpha".into(),
            destinations: vec!["rtmp://dst/live/key".into()],
            video_bitrate: 4500,
            audio_bitrate: 128,
            keyframe_interval: 2,
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["source_url"], "rtmp://ms:1935/live/alpha");
        assert_eq!(json["video_bitrate"], 4500);
        assert_eq!(json["keyframe_interval"], 2);
    }

    #[test]
    fn relay_mode_wire_encoding() {
        assert_eq!(
            serde_json::to_string(&RelayMode::Primary).unwrap(),
            "\"PRIMARY\""
        );
        assert_eq!(serde_json::to_string(&RelayMode::Loop).unwrap(), "\"LOOP\"");
    }
}
