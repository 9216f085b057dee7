//! A mount point: ring buffer, listener fan-out and the active source slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::listener::Listener;
use super::ring::RingBuffer;
use super::StreamMetadata;
use crate::error::{StreamError, StreamResult};
use crate::events::MountEvent;
use crate::source::{Source, SourceKind};
use crate::state::{MountConfig, StreamingConfig};

/// Display attributes of a mount, advertised to listeners and in status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    pub name: String,
    pub genre: String,
    pub description: String,
    pub url: String,
    pub bitrate: u32,
    pub content_type: String,
    pub public: bool,
    pub max_listeners: usize,
}

impl MountInfo {
    fn from_config(config: &MountConfig, streaming: &StreamingConfig) -> Self {
        Self {
            name: config.name.clone(),
            genre: config.genre.clone(),
            description: config.description.clone(),
            url: config.url.clone(),
            bitrate: config.bitrate,
            content_type: config.content_type.clone(),
            public: config.public,
            max_listeners: config
                .max_listeners
                .unwrap_or(streaming.max_listeners_per_mount),
        }
    }
}

/// Point-in-time snapshot of a mount for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MountStats {
    pub path: String,
    pub info: MountInfo,
    pub title: Option<String>,
    pub source: Option<SourceKind>,
    pub source_started_at: Option<DateTime<Utc>>,
    pub listeners: usize,
    pub listener_peak: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub buffered: usize,
}

/// Ring buffer and listener set share one lock so a joining listener's burst
/// and its registration are atomic with respect to `push_audio`.
struct MountCore {
    ring: RingBuffer,
    listeners: HashMap<Uuid, Arc<Listener>>,
}

/// A named stream endpoint.
///
/// Owned by the mount manager. Sources and listeners hold `Weak` references
/// back to it.
pub struct Mount {
    path: String,
    config: MountConfig,
    streaming: StreamingConfig,
    info: RwLock<MountInfo>,
    metadata: RwLock<Arc<StreamMetadata>>,
    core: Mutex<MountCore>,
    source: Mutex<Option<Arc<dyn Source>>>,
    source_started_at: RwLock<Option<DateTime<Utc>>>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    listener_peak: AtomicUsize,
    closed: AtomicBool,
    events: broadcast::Sender<MountEvent>,
    supervision: Mutex<Option<mpsc::UnboundedSender<MountEvent>>>,
}

impl Mount {
    /// Creates a mount with an empty buffer and no source.
    pub fn new(config: MountConfig, streaming: &StreamingConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(streaming.event_channel_capacity.max(1));
        log::debug!(
            "[Mount] Creating {} (buffer {} bytes, max {} listeners)",
            config.path,
            streaming.buffer_size,
            config
                .max_listeners
                .unwrap_or(streaming.max_listeners_per_mount)
        );
        Arc::new(Self {
            path: config.path.clone(),
            info: RwLock::new(MountInfo::from_config(&config, streaming)),
            metadata: RwLock::new(Arc::new(StreamMetadata::default())),
            core: Mutex::new(MountCore {
                ring: RingBuffer::new(streaming.buffer_size),
                listeners: HashMap::new(),
            }),
            source: Mutex::new(None),
            source_started_at: RwLock::new(None),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            listener_peak: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            events,
            supervision: Mutex::new(None),
            streaming: streaming.clone(),
            config,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Configuration the mount was created from (used for fallback sources).
    #[must_use]
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    #[must_use]
    pub fn streaming(&self) -> &StreamingConfig {
        &self.streaming
    }

    #[must_use]
    pub fn info(&self) -> MountInfo {
        self.info.read().clone()
    }

    /// Applies an in-place change to the display attributes.
    pub fn update_info(&self, f: impl FnOnce(&mut MountInfo)) {
        f(&mut self.info.write());
    }

    /// Subscribes to this mount's lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<MountEvent> {
        self.events.subscribe()
    }

    /// Opens the lossless channel that carries the events a supervisor acts
    /// on: `RelayFailed`, `SourceDisconnected` and `Closed`.
    ///
    /// Unlike [`subscribe_events`](Self::subscribe_events) nothing is dropped
    /// when the receiver falls behind. A second call replaces the first
    /// receiver.
    pub(crate) fn supervise(&self) -> mpsc::UnboundedReceiver<MountEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.supervision.lock() = Some(tx);
        rx
    }

    pub(crate) fn emit(&self, event: MountEvent) {
        if matches!(
            event,
            MountEvent::RelayFailed { .. }
                | MountEvent::SourceDisconnected { .. }
                | MountEvent::Closed { .. }
        ) {
            if let Some(tx) = self.supervision.lock().as_ref() {
                let _ = tx.send(event.clone());
            }
        }
        // No receivers is normal when nothing watches the mount.
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audio path
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends audio to the ring buffer and hands it to every listener, in order.
    pub fn push_audio(&self, chunk: Bytes) {
        if chunk.is_empty() || self.is_closed() {
            return;
        }
        self.bytes_in
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let core = &mut *self.core.lock();
        core.ring.write(&chunk);
        for listener in core.listeners.values() {
            listener.enqueue(chunk.clone());
        }
    }

    /// Returns up to `max_bytes` of the most recent audio, oldest first.
    #[must_use]
    pub fn burst(&self, max_bytes: usize) -> Bytes {
        self.core.lock().ring.tail(max_bytes)
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers a listener after checking source presence and capacity.
    ///
    /// The burst is queued on the listener under the same lock that
    /// `push_audio` takes, so the listener sees neither a gap nor a duplicate
    /// between pre-roll and live audio.
    pub(crate) fn attach_listener(&self, listener: Arc<Listener>) -> StreamResult<usize> {
        if self.is_closed() {
            return Err(StreamError::MountNotFound(self.path.clone()));
        }
        if !self.has_source() {
            return Err(StreamError::NoSource(self.path.clone()));
        }
        let max = self.info.read().max_listeners;

        let count = {
            let core = &mut *self.core.lock();
            if core.listeners.len() >= max {
                return Err(StreamError::ListenerLimit(self.path.clone()));
            }
            let burst = core.ring.tail(self.streaming.burst_size);
            if !burst.is_empty() {
                listener.enqueue(burst);
            }
            core.listeners.insert(listener.id(), listener.clone());
            core.listeners.len()
        };

        self.listener_peak.fetch_max(count, Ordering::Relaxed);
        log::info!(
            "[Mount] {} listener {} joined ({} connected)",
            self.path,
            listener.id(),
            count
        );
        self.emit(MountEvent::ListenerJoined {
            mount: self.path.clone(),
            listener_id: listener.id().to_string(),
            listeners: count,
        });
        Ok(count)
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub(crate) fn remove_listener(&self, id: Uuid) -> bool {
        let (removed, count) = {
            let mut core = self.core.lock();
            let removed = core.listeners.remove(&id).is_some();
            (removed, core.listeners.len())
        };
        if removed {
            log::info!(
                "[Mount] {} listener {} left ({} connected)",
                self.path,
                id,
                count
            );
            self.emit(MountEvent::ListenerLeft {
                mount: self.path.clone(),
                listener_id: id.to_string(),
                listeners: count,
            });
        }
        removed
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.core.lock().listeners.len()
    }

    #[must_use]
    pub fn listener_peak(&self) -> usize {
        self.listener_peak.load(Ordering::Relaxed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Current metadata; cheap to clone.
    #[must_use]
    pub fn metadata(&self) -> Arc<StreamMetadata> {
        self.metadata.read().clone()
    }

    /// Replaces the current metadata. Does not touch the ring buffer.
    pub fn update_metadata(&self, metadata: StreamMetadata) {
        let title = metadata.title.clone();
        *self.metadata.write() = Arc::new(metadata);
        log::debug!("[Mount] {} metadata: {:?}", self.path, title);
        self.emit(MountEvent::MetadataUpdated {
            mount: self.path.clone(),
            title,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Source slot
    // ─────────────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn source(&self) -> Option<Arc<dyn Source>> {
        self.source.lock().clone()
    }

    #[must_use]
    pub fn has_source(&self) -> bool {
        self.source.lock().is_some()
    }

    /// Makes `source` the active source, returning whatever it replaced.
    ///
    /// The caller decides whether the previous source is stopped or paused.
    pub fn set_source(&self, source: Arc<dyn Source>) -> Option<Arc<dyn Source>> {
        let previous = self.source.lock().replace(source.clone());
        self.mark_attached(source.as_ref());
        previous
    }

    /// Installs `source` only while the slot still holds `expected`.
    ///
    /// `expected` is a source id, or `None` for an empty slot. On a mismatch
    /// (or a closed mount) the unused source is handed back in `Err`.
    pub(crate) fn replace_source_if(
        &self,
        expected: Option<u64>,
        source: Arc<dyn Source>,
    ) -> Result<Option<Arc<dyn Source>>, Arc<dyn Source>> {
        let previous = {
            let mut slot = self.source.lock();
            if self.is_closed() || slot.as_ref().map(|s| s.id()) != expected {
                return Err(source);
            }
            slot.replace(source.clone())
        };
        self.mark_attached(source.as_ref());
        Ok(previous)
    }

    /// Atomically installs a live source unless one is already active.
    ///
    /// A closed mount refuses the claim with `MountNotFound`.
    pub(crate) fn claim_live(
        &self,
        live: Arc<dyn Source>,
    ) -> StreamResult<Option<Arc<dyn Source>>> {
        let previous = {
            let mut slot = self.source.lock();
            if self.is_closed() {
                return Err(StreamError::MountNotFound(self.path.clone()));
            }
            if slot
                .as_ref()
                .is_some_and(|s| s.kind() == SourceKind::Live)
            {
                return Err(StreamError::MountInUse);
            }
            slot.replace(live.clone())
        };
        self.mark_attached(live.as_ref());
        Ok(previous)
    }

    fn mark_attached(&self, source: &dyn Source) {
        *self.source_started_at.write() = Some(Utc::now());
        log::info!(
            "[Mount] {} source attached: {} #{} ({})",
            self.path,
            source.kind(),
            source.id(),
            source.describe()
        );
        self.emit(MountEvent::SourceAttached {
            mount: self.path.clone(),
            source_id: source.id(),
            kind: source.kind(),
        });
    }

    /// Clears the active source if it is still `source_id`.
    ///
    /// Emits `SourceDisconnected` so the supervisor can react. Returns the
    /// removed source, or `None` if another source had already replaced it.
    pub fn remove_source(&self, source_id: u64) -> Option<Arc<dyn Source>> {
        let removed = {
            let mut slot = self.source.lock();
            if slot.as_ref().is_some_and(|s| s.id() == source_id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(source) = &removed {
            *self.source_started_at.write() = None;
            log::info!(
                "[Mount] {} source removed: {} #{}",
                self.path,
                source.kind(),
                source.id()
            );
            self.emit(MountEvent::SourceDisconnected {
                mount: self.path.clone(),
                source_id: source.id(),
                kind: source.kind(),
            });
        }
        removed
    }

    /// Hands the slot from a finished live source back to `previous`.
    ///
    /// Swaps atomically so nothing observes an empty slot in between. Returns
    /// false, leaving the slot alone, when `live_id` is no longer the active
    /// source or the mount is closed.
    pub(crate) fn release_live(&self, live_id: u64, previous: Option<Arc<dyn Source>>) -> bool {
        let live = {
            let mut slot = self.source.lock();
            if self.is_closed() || !slot.as_ref().is_some_and(|s| s.id() == live_id) {
                return false;
            }
            std::mem::replace(&mut *slot, previous.clone())
        };
        if let Some(live) = live {
            log::info!("[Mount] {} live source #{} released", self.path, live.id());
            self.emit(MountEvent::SourceDisconnected {
                mount: self.path.clone(),
                source_id: live.id(),
                kind: live.kind(),
            });
        }
        match previous {
            Some(previous) => self.mark_attached(previous.as_ref()),
            None => *self.source_started_at.write() = None,
        }
        true
    }

    /// Stops the source and every listener. The mount accepts nothing afterwards.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let source = self.source.lock().take();
        if let Some(source) = source {
            source.stop();
        }
        let listeners: Vec<Arc<Listener>> = {
            let mut core = self.core.lock();
            core.listeners.drain().map(|(_, l)| l).collect()
        };
        log::info!(
            "[Mount] {} closed ({} listeners disconnected)",
            self.path,
            listeners.len()
        );
        for listener in listeners {
            listener.stop();
        }
        self.emit(MountEvent::Closed {
            mount: self.path.clone(),
        });
    }

    /// Snapshot for the status document.
    #[must_use]
    pub fn stats(&self) -> MountStats {
        let (listeners, buffered) = {
            let core = self.core.lock();
            (core.listeners.len(), core.ring.len())
        };
        MountStats {
            path: self.path.clone(),
            info: self.info(),
            title: self.metadata().title.clone(),
            source: self.source().map(|s| s.kind()),
            source_started_at: *self.source_started_at.read(),
            listeners,
            listener_peak: self.listener_peak(),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            buffered,
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        log::debug!("[Mount] {} dropped", self.path);
    }
}
