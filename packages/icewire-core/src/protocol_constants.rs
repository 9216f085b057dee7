//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the ICY/Icecast wire protocol or by the
//! interoperability expectations of existing listening clients. Tunable
//! defaults live in [`crate::state`].

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// Size of one unit of the ICY metadata length byte.
///
/// The length byte counts 16-byte blocks, so a block carries at most
/// `255 * 16` bytes of text.
pub const ICY_BLOCK_UNIT: usize = 16;

/// Largest payload a single metadata block can describe.
pub const ICY_MAX_METADATA_LEN: usize = u8::MAX as usize * ICY_BLOCK_UNIT;

/// Metadata key carrying the current title.
pub const ICY_STREAM_TITLE: &str = "StreamTitle";

/// Metadata key carrying the current URL.
pub const ICY_STREAM_URL: &str = "StreamUrl";

// ─────────────────────────────────────────────────────────────────────────────
// Icecast Emulation
// ─────────────────────────────────────────────────────────────────────────────

/// `Server` header sent to listeners.
///
/// Some players only enable ICY handling when they see an Icecast server
/// banner, so this mirrors a real Icecast release.
pub const ICECAST_SERVER_HEADER: &str = "Icecast 2.4.4";

/// Basic auth realm for source clients.
pub const SOURCE_AUTH_REALM: &str = "Icecast";

/// Basic auth realm for admin requests.
pub const ADMIN_AUTH_REALM: &str = "Icecast Admin";

/// Fallback content type when neither config nor source supplies one.
pub const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

/// Fallback nominal bitrate (kbps).
pub const DEFAULT_BITRATE_KBPS: u32 = 128;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Front End
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum size of a request head (request line + headers).
pub const MAX_REQUEST_HEAD_SIZE: usize = 16 * 1024;

/// Time allowed for a client to deliver its request head (seconds).
pub const REQUEST_HEAD_TIMEOUT_SECS: u64 = 10;

/// Maximum size of a control-plane request body (admin JSON).
pub const MAX_ADMIN_BODY_SIZE: usize = 64 * 1024;

/// Read buffer size used for live source uploads.
pub const SOURCE_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Application identity sent as the relay client's `User-Agent`.
pub const SERVER_ID: &str = concat!("icewire/", env!("CARGO_PKG_VERSION"));
