//! Mount data path: ICY framing, ring buffer, fan-out and listener output.

pub mod icy;
pub mod listener;
pub mod mount;
pub mod ring;

pub use icy::{DemuxItem, IcyDemuxer, IcyFormatter, IcyInterleaver};
pub use listener::{Listener, ListenerOptions, ListenerQueue};
pub use mount::{Mount, MountInfo, MountStats};
pub use ring::RingBuffer;

use serde::{Deserialize, Serialize};

/// Metadata currently advertised on a mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub url: Option<String>,
}

impl StreamMetadata {
    /// Creates metadata carrying only a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            url: None,
        }
    }
}
