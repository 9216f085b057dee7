//! Mount lifecycle events.
//!
//! Every [`Mount`](crate::stream::Mount) owns a broadcast channel of
//! [`MountEvent`]s, which the server binary logs. The events that drive
//! fallback also go to the mount manager's supervisor over a separate
//! lossless channel, so a burst of listener or metadata events cannot
//! crowd them out.

use serde::Serialize;

use crate::source::SourceKind;

/// Events emitted by a mount and the sources feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MountEvent {
    /// A source became the mount's active source.
    SourceAttached {
        mount: String,
        #[serde(rename = "sourceId")]
        source_id: u64,
        kind: SourceKind,
    },
    /// The active source was cleared without a replacement.
    SourceDisconnected {
        mount: String,
        #[serde(rename = "sourceId")]
        source_id: u64,
        kind: SourceKind,
    },
    /// A relay exhausted its reconnect attempts and stopped for good.
    RelayFailed {
        mount: String,
        #[serde(rename = "sourceId")]
        source_id: u64,
        attempts: u32,
    },
    /// The mount's current metadata changed.
    MetadataUpdated {
        mount: String,
        title: Option<String>,
    },
    ListenerJoined {
        mount: String,
        #[serde(rename = "listenerId")]
        listener_id: String,
        listeners: usize,
    },
    ListenerLeft {
        mount: String,
        #[serde(rename = "listenerId")]
        listener_id: String,
        listeners: usize,
    },
    /// The mount was removed from the registry; no more events follow.
    Closed { mount: String },
}

impl MountEvent {
    /// Mount path the event belongs to.
    #[must_use]
    pub fn mount(&self) -> &str {
        match self {
            Self::SourceAttached { mount, .. }
            | Self::SourceDisconnected { mount, .. }
            | Self::RelayFailed { mount, .. }
            | Self::MetadataUpdated { mount, .. }
            | Self::ListenerJoined { mount, .. }
            | Self::ListenerLeft { mount, .. }
            | Self::Closed { mount } => mount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = MountEvent::RelayFailed {
            mount: "/stream".into(),
            source_id: 7,
            attempts: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "relayFailed");
        assert_eq!(json["sourceId"], 7);
        assert_eq!(event.mount(), "/stream");
    }
}
