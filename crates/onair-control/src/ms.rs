//! Media-server streams API client.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Receive bitrate above which a primary publisher counts as live.
/// Guards preemption against spurious zero-bitrate sessions.
pub const PRIMARY_LIVENESS_THRESHOLD_KBPS: i32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct MsStream {
    pub name: String,
    #[serde(default)]
    pub publish: PublishInfo,
    #[serde(default)]
    pub kbps: KbpsInfo,
    #[serde(default)]
    pub video: VideoInfo,
    #[serde(default)]
    pub live_ms: i64,
    #[serde(default)]
    pub clients: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishInfo {
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KbpsInfo {
    #[serde(default)]
    pub recv_30s: i32,
    #[serde(default)]
    pub send_30s: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub codec: String,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    streams: Vec<MsStream>,
}

impl MsStream {
    /// Robust liveness for a loop ingest: an active publisher actually
    /// moving data or carrying a decoded picture.
    pub fn loop_live(&self) -> bool {
        self.publish.active && (self.kbps.recv_30s > 0 || self.video.width > 0)
    }

    /// Robust liveness for a primary ingest: a stale registered stream
    /// must not trigger preemption, so require real throughput.
    pub fn primary_live(&self) -> bool {
        self.publish.active && self.kbps.recv_30s > PRIMARY_LIVENESS_THRESHOLD_KBPS
    }
}

pub struct MsClient {
    base: String,
    client: reqwest::Client,
}

impl MsClient {
    pub fn new(api_url: &str) -> Self {
        Self {
            base: api_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .expect("reqwest client build"),
        }
    }

    /// Fetch all published streams, keyed by stream name.
    pub async fn fetch_streams(&self) -> anyhow::Result<HashMap<String, MsStream>> {
        let resp: StreamsResponse = self
            .client
            .get(format!("{}/api/v1/streams", self.base))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp
            .streams
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(active: bool, kbps: i32, width: i32) -> MsStream {
        MsStream {
            name: "alpha".into(),
            publish: PublishInfo { active },
            kbps: KbpsInfo {
                recv_30s: kbps,
                send_30s: 0,
            },
            video: VideoInfo {
                width,
                height: 0,
                codec: String::new(),
            },
            live_ms: 0,
            clients: 0,
        }
    }

    #[test]
    fn loop_liveness_accepts_bitrate_or_picture() {
        assert!(stream(true, 500, 0).loop_live());
        assert!(stream(true, 0, 1920).loop_live());
        assert!(!stream(true, 0, 0).loop_live());
        assert!(!stream(false, 500, 1920).loop_live());
    }

    #[test]
    fn primary_liveness_requires_throughput_above_threshold() {
        assert!(stream(true, 2500, 1920).primary_live());
        assert!(!stream(true, PRIMARY_LIVENESS_THRESHOLD_KBPS, 1920).primary_live());
        assert!(!stream(true, 0, 1920).primary_live());
        assert!(!stream(false, 2500, 1920).primary_live());
    }

    #[test]
    fn streams_response_parses_ms_shape() {
        let json = r#"{
            "code": 0,
            "server": "ms",
            "streams": [{
                "name": "alpha-primary",
                "publish": {"active": true, "cid": "c1"},
                "kbps": {"recv_30s": 2500, "send_30s": 2400},
                "video": {"codec": "H264", "width": 1920, "height": 1080},
                "live_ms": 7200000,
                "clients": 2
            }]
        }"#;
        let resp: StreamsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.streams.len(), 1);
        assert!(resp.streams[0].primary_live());
        assert_eq!(resp.streams[0].video.width, 1920);
    }
}
