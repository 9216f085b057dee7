//! Application services layer.
//!
//! Orchestration that sits between the HTTP front end and the stream
//! primitives in [`crate::stream`] and [`crate::source`].

pub mod mount_manager;

pub use mount_manager::{MountManager, SourceRequest};
