//! Icewire Core - Icecast/SHOUTcast-compatible broadcast engine.
//!
//! This crate provides mount points that fan one audio source out to many
//! HTTP listeners, with in-band ICY metadata, a bounded backlog for late
//! joiners and per-listener backpressure. It is used by the standalone
//! server binary and can be embedded elsewhere.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`stream`]: Mounts, the shared ring buffer, listeners and ICY framing
//! - [`source`]: Producers that feed a mount (playlist, relay, live upload)
//! - [`services`]: The mount registry and its source supervision
//! - [`api`]: The single-port HTTP front end (streaming, status, admin)
//! - [`context`]: Network configuration and URL building
//! - [`state`]: Configuration
//! - [`events`]: Per-mount lifecycle events
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`Source`](source::Source): Anything that can feed a mount
//! - [`IpDetector`](context::IpDetector): Local IP detection

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod services;
pub mod source;
pub mod state;
pub mod stream;

// Re-export commonly used types at the crate root
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError, UrlBuilder};
pub use error::{StreamError, StreamResult};
pub use events::MountEvent;
pub use state::{Config, MountConfig, RetryPolicy, SourceType, StreamingConfig};

// Re-export stream types
pub use stream::{Listener, ListenerOptions, Mount, MountInfo, MountStats, StreamMetadata};

// Re-export source types
pub use source::{
    LiveSession, LiveSourceRequest, PlaylistSource, RelaySource, Source, SourceKind,
};

// Re-export service types
pub use services::{MountManager, SourceRequest};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{serve, start_server, AppState, ServerError};
