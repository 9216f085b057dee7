//! Producers that feed audio into a mount.
//!
//! Three kinds exist: a local [`PlaylistSource`], an upstream
//! [`RelaySource`], and a live uploader handled by [`live`]. All of them only
//! ever call [`Mount::push_audio`](crate::stream::Mount::push_audio) and
//! metadata setters; none of them touch listeners.

pub mod live;
pub mod playlist;
pub mod relay;

pub use live::{IceHeaders, LiveHandle, LiveOutcome, LiveSession, LiveSourceRequest};
pub use playlist::PlaylistSource;
pub use relay::{RelayError, RelaySource};

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Kind tag used for status reporting and the "mount in use" check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Playlist,
    Relay,
    Live,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Relay => "relay",
            Self::Live => "live",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common interface over the source variants.
///
/// `stop` must be idempotent and safe to call from inside the source's own
/// task. Pause and resume are optional: [`supports_pause`](Self::supports_pause)
/// tells callers whether they do anything.
pub trait Source: Send + Sync {
    /// Process-unique id, used to match events against the active source.
    fn id(&self) -> u64;

    fn kind(&self) -> SourceKind;

    /// Begins producing audio. Calling it again after `stop` does nothing.
    fn start(&self);

    /// Stops producing audio for good and releases connections and timers.
    fn stop(&self);

    fn supports_pause(&self) -> bool {
        false
    }

    /// Suspends production while keeping position so `resume` can continue.
    fn pause(&self) {}

    fn resume(&self) {}

    /// Terminates the current connection without retiring the source.
    ///
    /// A live upload is closed, a relay drops its upstream and connects
    /// again, a playlist has no connection and ignores it.
    fn disconnect(&self) {}

    /// Short human-readable description (directory, URL, peer address).
    fn describe(&self) -> String;
}

/// Allocates a new source id.
pub(crate) fn next_source_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
