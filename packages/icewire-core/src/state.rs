//! Core configuration types.
//!
//! All fields have defaults matching a stock single-mount deployment, so a
//! config file only needs to mention what it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{DEFAULT_BITRATE_KBPS, DEFAULT_CONTENT_TYPE};

/// Which producer a configured mount starts with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Local files from `music_dir`.
    #[default]
    Playlist,
    /// Pull an upstream ICY/Icecast stream from `relay_url`.
    Relay,
}

/// Configuration for a single mount point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Mount path, e.g. `/stream`.
    pub path: String,
    /// Source attached when the mount is created.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Directory scanned by the playlist source (also the relay fallback).
    pub music_dir: PathBuf,
    /// Upstream URL for relay mounts.
    pub relay_url: Option<String>,
    pub name: String,
    pub genre: String,
    pub description: String,
    pub url: String,
    /// Nominal bitrate in kbps. Drives playlist pacing.
    pub bitrate: u32,
    pub content_type: String,
    pub public: bool,
    /// Per-mount listener cap; falls back to the global cap when unset.
    pub max_listeners: Option<usize>,
}

impl MountConfig {
    /// Creates a playlist mount config with defaults for everything else.
    pub fn playlist(path: impl Into<String>, music_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            music_dir: music_dir.into(),
            ..Self::default()
        }
    }

    /// Creates a relay mount config with defaults for everything else.
    pub fn relay(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source_type: SourceType::Relay,
            relay_url: Some(url.into()),
            ..Self::default()
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            path: "/stream".to_string(),
            source_type: SourceType::Playlist,
            music_dir: PathBuf::from("./music"),
            relay_url: None,
            name: String::new(),
            genre: String::new(),
            description: String::new(),
            url: String::new(),
            bitrate: DEFAULT_BITRATE_KBPS,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            public: true,
            max_listeners: None,
        }
    }
}

/// Exponential backoff for relay reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay (milliseconds).
    pub max_delay_ms: u64,
    /// Consecutive failures after which the relay gives up.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Returns the delay to wait after the `failures`-th consecutive failure.
    ///
    /// `failures` is 1-based: the first failure waits `initial_delay_ms`,
    /// each further failure doubles it, capped at `max_delay_ms`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

/// Configuration for buffering, pacing and timeouts on the data path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Audio bytes between ICY metadata blocks sent to listeners.
    pub icy_metaint: usize,
    /// Bytes of recent audio sent to a listener on connect.
    pub burst_size: usize,
    /// Ring buffer capacity per mount.
    pub buffer_size: usize,
    /// Ceiling of a listener's pending output queue.
    pub listener_queue_bytes: usize,
    /// Listener cap for mounts without their own `max_listeners`.
    pub max_listeners_per_mount: usize,
    /// Silence after which a live source or relay connection is dropped.
    pub source_timeout_secs: u64,
    /// How often the live source watchdog checks for silence.
    pub watchdog_interval_secs: u64,
    /// Bytes pushed per playlist tick.
    pub playlist_chunk_size: usize,
    /// File extensions picked up by the playlist (case-insensitive).
    pub playlist_extensions: Vec<String>,
    /// Capacity of each mount's event channel.
    pub event_channel_capacity: usize,
}

impl StreamingConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.icy_metaint == 0 {
            return Err("icy_metaint must be >= 1".to_string());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be >= 1".to_string());
        }
        if self.listener_queue_bytes == 0 {
            return Err("listener_queue_bytes must be >= 1".to_string());
        }
        if self.playlist_chunk_size == 0 {
            return Err("playlist_chunk_size must be >= 1".to_string());
        }
        if self.source_timeout_secs == 0 {
            return Err("source_timeout_secs must be >= 1".to_string());
        }
        if self.watchdog_interval_secs == 0 {
            return Err("watchdog_interval_secs must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be >= 1".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            icy_metaint: 16_000,
            burst_size: 65_536,
            buffer_size: 524_288,
            listener_queue_bytes: 512 * 1024,
            max_listeners_per_mount: 100,
            source_timeout_secs: 10,
            watchdog_interval_secs: 5,
            playlist_chunk_size: 4096,
            playlist_extensions: vec!["mp3".to_string()],
            event_channel_capacity: 100,
        }
    }
}

/// Configuration for the icewire core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name reported in the status document.
    pub server_name: String,
    /// Password live sources must present (any user name).
    pub source_password: String,
    /// Password for the authenticated admin endpoints.
    pub admin_password: String,
    pub streaming: StreamingConfig,
    pub relay_retry: RetryPolicy,
    /// Mounts created at startup.
    pub mounts: Vec<MountConfig>,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.streaming.validate()?;
        if self.relay_retry.max_attempts == 0 {
            return Err("relay_retry.max_attempts must be >= 1".to_string());
        }
        for mount in &self.mounts {
            if !mount.path.starts_with('/') {
                return Err(format!("mount path '{}' must start with '/'", mount.path));
            }
            if mount.source_type == SourceType::Relay && mount.relay_url.is_none() {
                return Err(format!("relay mount '{}' has no relay_url", mount.path));
            }
        }
        Ok(())
    }

    /// Returns the configured entry for a mount path, if any.
    #[must_use]
    pub fn mount_config(&self, path: &str) -> Option<&MountConfig> {
        self.mounts.iter().find(|m| m.path == path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "icewire".to_string(),
            source_password: "hackme".to_string(),
            admin_password: "admin".to_string(),
            streaming: StreamingConfig::default(),
            relay_retry: RetryPolicy::default(),
            mounts: vec![MountConfig::default()],
        }
    }
}
