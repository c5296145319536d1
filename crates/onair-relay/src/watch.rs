//! Media-server stream watcher.
//!
//! While the configured source is a primary ingest, poll the media
//! server's streams API once a second; if the stream disappears or stops
//! publishing, trigger the same internal failover as a pump exit. Catches
//! the case where the pump keeps a half-open session alive after the
//! publisher is gone.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::state::RelayState;

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    name: String,
    #[serde(default)]
    publish: PublishInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PublishInfo {
    #[serde(default)]
    active: bool,
}

/// Stream name is the last path segment of an RTMP URL, without query
/// parameters.
pub fn stream_name_from_url(url: &str) -> Option<&str> {
    let name = url.rsplit('/').next()?.split('?').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

pub async fn run(state: Arc<RelayState>) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "watcher client build failed");
            return;
        }
    };

    let endpoint = format!("{}/api/v1/streams", state.ms_api_url.trim_end_matches('/'));
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;

        let source = {
            let config = state.config.lock().expect("config lock poisoned");
            config.source_url.clone()
        };
        // Only primary sources on the local media server are watched.
        if source == state.loop_url || !source.starts_with("rtmp://") {
            continue;
        }
        let Some(stream_name) = stream_name_from_url(&source) else {
            continue;
        };

        let resp = match client.get(&endpoint).send().await {
            Ok(resp) => resp,
            Err(_) => continue,
        };
        let streams: StreamsResponse = match resp.json().await {
            Ok(streams) => streams,
            Err(_) => continue,
        };

        let found = streams
            .streams
            .iter()
            .any(|s| s.name == stream_name && s.publish.active);
        if !found {
            state.trigger_failover(&format!("watcher lost {stream_name}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_strips_path_and_query() {
        assert_eq!(
            stream_name_from_url("rtmp://ms:1935/live/alpha-primary?token=abc"),
            Some("alpha-primary")
        );
        assert_eq!(
            stream_name_from_url("rtmp://ms:1935/live/alpha"),
            Some("alpha")
        );
        assert_eq!(stream_name_from_url("rtmp://ms:1935/live/"), None);
    }
}
