//! Icecast-compatible `status-json.xsl` document.
//!
//! Field names follow Icecast's JSON status so existing dashboards and
//! directory scrapers can read it. Note the Icecast quirk: `source` is a bare
//! object when exactly one mount exists and an array otherwise.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::context::NetworkContext;
use crate::stream::MountStats;

#[derive(Debug, Serialize)]
pub struct IceStatsDocument {
    pub icestats: IceStats,
}

#[derive(Debug, Serialize)]
pub struct IceStats {
    pub admin: String,
    pub host: String,
    pub location: String,
    pub server_id: String,
    pub server_start: String,
    pub server_start_iso8601: String,
    pub source: SourceField,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SourceField {
    One(Box<SourceStats>),
    Many(Vec<SourceStats>),
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub listenurl: String,
    pub server_name: String,
    pub server_description: String,
    pub server_type: String,
    pub server_url: String,
    pub genre: String,
    pub title: String,
    pub ice_bitrate: u32,
    pub audio_bitrate: u64,
    pub listeners: usize,
    pub listener_peak: usize,
    pub total_bytes_read: u64,
    pub total_bytes_sent: u64,
    pub stream_start_iso8601: String,
    pub public: u8,
}

fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SourceStats {
    fn from_mount(stats: &MountStats, network: &NetworkContext) -> Self {
        let info = &stats.info;
        Self {
            listenurl: network.listen_url(&stats.path),
            server_name: info.name.clone(),
            server_description: info.description.clone(),
            server_type: info.content_type.clone(),
            server_url: info.url.clone(),
            genre: info.genre.clone(),
            title: stats.title.clone().unwrap_or_default(),
            ice_bitrate: info.bitrate,
            audio_bitrate: u64::from(info.bitrate) * 1000,
            listeners: stats.listeners,
            listener_peak: stats.listener_peak,
            total_bytes_read: stats.bytes_in,
            total_bytes_sent: stats.bytes_out,
            stream_start_iso8601: stats.source_started_at.map(iso8601).unwrap_or_default(),
            public: u8::from(info.public),
        }
    }
}

/// Builds the status document from mount snapshots.
pub fn icestats(
    mounts: &[MountStats],
    network: &NetworkContext,
    server_start: DateTime<Utc>,
    server_id: &str,
) -> IceStatsDocument {
    let mut sources: Vec<SourceStats> = mounts
        .iter()
        .map(|m| SourceStats::from_mount(m, network))
        .collect();
    let source = if sources.len() == 1 {
        SourceField::One(Box::new(sources.remove(0)))
    } else {
        SourceField::Many(sources)
    };
    IceStatsDocument {
        icestats: IceStats {
            admin: String::new(),
            host: network.get_advertise_host(),
            location: String::new(),
            server_id: server_id.to_string(),
            server_start: server_start.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            server_start_iso8601: iso8601(server_start),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    use crate::state::{MountConfig, StreamingConfig};
    use crate::stream::Mount;

    fn stats_for(paths: &[&str]) -> Vec<MountStats> {
        paths
            .iter()
            .map(|p| {
                let mut config = MountConfig::playlist(*p, "./music");
                config.name = format!("Radio {p}");
                config.genre = "Jazz".into();
                Mount::new(config, &StreamingConfig::default()).stats()
            })
            .collect()
    }

    fn render(paths: &[&str]) -> Value {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let doc = icestats(&stats_for(paths), &NetworkContext::for_test(), start, "icewire");
        serde_json::to_value(doc).unwrap()
    }

    #[test]
    fn single_mount_is_an_object() {
        let json = render(&["/stream"]);
        let stats = &json["icestats"];
        assert_eq!(stats["server_start_iso8601"], "2024-03-01T12:00:00.000Z");
        assert_eq!(stats["server_start"], "Fri, 01 Mar 2024 12:00:00 GMT");
        assert_eq!(stats["server_id"], "icewire");
        let source = &stats["source"];
        assert!(source.is_object());
        assert_eq!(source["listenurl"], "http://127.0.0.1:8000/stream");
        assert_eq!(source["server_name"], "Radio /stream");
        assert_eq!(source["genre"], "Jazz");
        assert_eq!(source["ice_bitrate"], 128);
        assert_eq!(source["audio_bitrate"], 128000);
        assert_eq!(source["title"], "");
        assert_eq!(source["stream_start_iso8601"], "");
        assert_eq!(source["public"], 1);
    }

    #[test]
    fn other_counts_are_arrays() {
        let json = render(&["/a", "/b"]);
        let sources = json["icestats"]["source"].as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1]["listenurl"], "http://127.0.0.1:8000/b");

        let empty = render(&[]);
        assert_eq!(empty["icestats"]["source"], Value::Array(Vec::new()));
    }
}
