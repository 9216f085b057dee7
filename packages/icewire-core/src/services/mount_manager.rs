//! Mount registry and source switching.
//!
//! The manager is the only place that creates mounts, removes them, or puts a
//! new source into a mount's slot on its own initiative. Every mount gets a
//! supervisor task that watches its supervision channel and repairs the slot:
//! a relay that gave up is replaced by a playlist, and a configured mount
//! left without any source gets its configured default back.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, StreamResult};
use crate::events::MountEvent;
use crate::source::{
    LiveSession, LiveSourceRequest, PlaylistSource, RelaySource, Source, SourceKind,
};
use crate::state::{Config, MountConfig, SourceType};
use crate::stream::{Mount, MountStats, StreamMetadata};

/// Which producer to attach to a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    /// Local files; `None` uses the mount's configured directory.
    Playlist { music_dir: Option<PathBuf> },
    Relay { url: String },
}

impl SourceRequest {
    /// The source a mount configuration asks for.
    ///
    /// A relay mount without a URL plays its directory instead.
    #[must_use]
    pub fn from_config(config: &MountConfig) -> Self {
        match (config.source_type, &config.relay_url) {
            (SourceType::Relay, Some(url)) => Self::Relay { url: url.clone() },
            _ => Self::Playlist { music_dir: None },
        }
    }
}

struct MountEntry {
    mount: Arc<Mount>,
    supervisor: CancellationToken,
}

/// Registry of mounts.
pub struct MountManager {
    config: Arc<Config>,
    mounts: DashMap<String, MountEntry>,
    http_client: reqwest::Client,
}

impl MountManager {
    /// Creates an empty registry. Call [`start_configured`](Self::start_configured)
    /// to create the configured mounts.
    pub fn new(config: Arc<Config>, http_client: reqwest::Client) -> Arc<Self> {
        Arc::new(Self {
            config,
            mounts: DashMap::new(),
            http_client,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates every mount listed in the configuration.
    pub fn start_configured(self: &Arc<Self>) -> StreamResult<()> {
        for mount in &self.config.mounts {
            self.create_mount(mount.clone())?;
        }
        log::info!("[Manager] Started {} configured mount(s)", self.mounts.len());
        Ok(())
    }

    /// Creates a mount and attaches the source its configuration asks for.
    ///
    /// Fails if the path is already registered.
    pub fn create_mount(self: &Arc<Self>, config: MountConfig) -> StreamResult<Arc<Mount>> {
        let request = SourceRequest::from_config(&config);
        let mount = self.register(config, true)?;
        self.attach(&mount, &request);
        Ok(mount)
    }

    /// Returns the mount at `path`, creating an empty one if needed.
    ///
    /// Mounts created here exist only for live uploads: they have no default
    /// source and nothing is restored when the upload ends.
    pub fn get_or_create(self: &Arc<Self>, path: &str) -> StreamResult<Arc<Mount>> {
        if let Some(mount) = self.get(path) {
            return Ok(mount);
        }
        let config = self.config.mount_config(path).cloned().unwrap_or_else(|| MountConfig {
            path: path.to_string(),
            name: path.trim_start_matches('/').to_string(),
            ..MountConfig::default()
        });
        match self.register(config, false) {
            Err(StreamError::InvalidRequest(_)) => self
                .get(path)
                .ok_or_else(|| StreamError::MountNotFound(path.to_string())),
            other => other,
        }
    }

    fn register(self: &Arc<Self>, config: MountConfig, configured: bool) -> StreamResult<Arc<Mount>> {
        let path = config.path.clone();
        let (mount, events, supervisor) = match self.mounts.entry(path.clone()) {
            Entry::Occupied(_) => {
                return Err(StreamError::InvalidRequest(format!(
                    "Mount {path} already exists"
                )));
            }
            Entry::Vacant(slot) => {
                let mount = Mount::new(config, &self.config.streaming);
                // Open before any source is attached so no event is missed.
                let events = mount.supervise();
                let supervisor = CancellationToken::new();
                slot.insert(MountEntry {
                    mount: mount.clone(),
                    supervisor: supervisor.clone(),
                });
                (mount, events, supervisor)
            }
        };

        tokio::spawn(supervise(
            Arc::downgrade(self),
            Arc::downgrade(&mount),
            events,
            supervisor,
            configured,
        ));
        log::info!(
            "[Manager] Mount {} created{}",
            path,
            if configured { "" } else { " on demand" }
        );
        Ok(mount)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.get(path).map(|entry| entry.mount.clone())
    }

    fn require(&self, path: &str) -> StreamResult<Arc<Mount>> {
        self.get(path)
            .ok_or_else(|| StreamError::MountNotFound(path.to_string()))
    }

    /// All mounts, sorted by path.
    #[must_use]
    pub fn mounts(&self) -> Vec<Arc<Mount>> {
        let mut mounts: Vec<Arc<Mount>> =
            self.mounts.iter().map(|e| e.mount.clone()).collect();
        mounts.sort_by(|a, b| a.path().cmp(b.path()));
        mounts
    }

    #[must_use]
    pub fn stats(&self) -> Vec<MountStats> {
        self.mounts().iter().map(|m| m.stats()).collect()
    }

    /// Stops the mount's source and every listener, then forgets the mount.
    pub fn remove_mount(&self, path: &str) -> StreamResult<()> {
        let (_, entry) = self
            .mounts
            .remove(path)
            .ok_or_else(|| StreamError::MountNotFound(path.to_string()))?;
        entry.supervisor.cancel();
        entry.mount.close();
        log::info!("[Manager] Mount {} removed", path);
        Ok(())
    }

    /// Removes every mount. Used on server shutdown.
    pub fn shutdown(&self) -> usize {
        let paths: Vec<String> = self.mounts.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for path in paths {
            if self.remove_mount(&path).is_ok() {
                removed += 1;
            }
        }
        log::info!("[Manager] Shut down {} mount(s)", removed);
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sources
    // ─────────────────────────────────────────────────────────────────────────

    fn build_source(&self, mount: &Arc<Mount>, request: &SourceRequest) -> Arc<dyn Source> {
        let streaming = &self.config.streaming;
        match request {
            SourceRequest::Playlist { music_dir } => {
                let mut config = mount.config().clone();
                if let Some(dir) = music_dir {
                    config.music_dir = dir.clone();
                }
                PlaylistSource::new(
                    mount,
                    &config,
                    streaming.playlist_chunk_size,
                    streaming.playlist_extensions.clone(),
                )
            }
            SourceRequest::Relay { url } => RelaySource::with_client(
                mount,
                url.clone(),
                self.config.relay_retry,
                streaming.source_timeout(),
                self.http_client.clone(),
            ),
        }
    }

    fn attach(&self, mount: &Arc<Mount>, request: &SourceRequest) -> Arc<dyn Source> {
        let source = self.build_source(mount, request);
        if let Some(previous) = mount.set_source(source.clone()) {
            previous.stop();
        }
        source.start();
        source
    }

    /// Replaces the active source with a new one of the requested type.
    ///
    /// The previous source is stopped, not paused; a live upload in the slot
    /// is disconnected. A relay started here falls back to the playlist like
    /// a configured one.
    pub fn switch_source(&self, path: &str, request: SourceRequest) -> StreamResult<SourceKind> {
        let mount = self.require(path)?;
        if let SourceRequest::Relay { url } = &request {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(StreamError::InvalidRequest(format!(
                    "Relay URL must be http(s): {url}"
                )));
            }
        }
        let source = self.attach(&mount, &request);
        log::info!(
            "[Manager] {} switched to {} ({})",
            path,
            source.kind(),
            source.describe()
        );
        Ok(source.kind())
    }

    /// Sets the mount's current title.
    pub fn update_metadata(&self, path: &str, title: &str, url: Option<String>) -> StreamResult<()> {
        let mount = self.require(path)?;
        mount.update_metadata(StreamMetadata {
            title: Some(title.to_string()),
            url,
        });
        Ok(())
    }

    /// Terminates the active source's connection.
    ///
    /// A live upload ends and the source it pre-empted resumes. A relay
    /// reconnects. Returns the kind of source that was hit.
    pub fn kill_source(&self, path: &str) -> StreamResult<SourceKind> {
        let mount = self.require(path)?;
        let source = mount
            .source()
            .ok_or_else(|| StreamError::NoSource(path.to_string()))?;
        log::info!(
            "[Manager] Killing {} source #{} on {}",
            source.kind(),
            source.id(),
            path
        );
        source.disconnect();
        Ok(source.kind())
    }

    /// Authenticates a live upload and claims its mount.
    ///
    /// The mount is created on demand. The returned session must be run to
    /// completion with the upload body.
    pub fn accept_live(
        self: &Arc<Self>,
        request: &LiveSourceRequest,
    ) -> StreamResult<(Arc<Mount>, LiveSession)> {
        request.check(&self.config.source_password)?;
        let mount = self.get_or_create(&request.mount)?;
        let session = LiveSession::begin(&mount, request)?;
        Ok((mount, session))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Supervision
    // ─────────────────────────────────────────────────────────────────────────

    /// Replaces a relay that gave up with a playlist from the mount's config.
    fn fall_back_to_playlist(&self, mount: &Arc<Mount>, failed_id: u64) {
        let playlist = self.build_source(mount, &SourceRequest::Playlist { music_dir: None });
        match mount.replace_source_if(Some(failed_id), playlist.clone()) {
            Ok(previous) => {
                if let Some(previous) = previous {
                    previous.stop();
                }
                log::warn!(
                    "[Manager] Relay on {} failed, falling back to playlist {}",
                    mount.path(),
                    playlist.describe()
                );
                playlist.start();
            }
            Err(_) => log::debug!(
                "[Manager] Ignoring stale relay failure #{} on {}",
                failed_id,
                mount.path()
            ),
        }
    }

    /// Puts the configured default source back into an empty slot.
    fn restore_default(&self, mount: &Arc<Mount>) {
        let request = SourceRequest::from_config(mount.config());
        let source = self.build_source(mount, &request);
        if mount.replace_source_if(None, source.clone()).is_ok() {
            log::info!(
                "[Manager] Restored default {} source on {}",
                source.kind(),
                mount.path()
            );
            source.start();
        }
    }
}

async fn supervise(
    manager: Weak<MountManager>,
    mount: Weak<Mount>,
    mut events: mpsc::UnboundedReceiver<MountEvent>,
    cancel: CancellationToken,
    configured: bool,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return;
        };

        let (Some(manager), Some(mount)) = (manager.upgrade(), mount.upgrade()) else {
            return;
        };
        match event {
            MountEvent::Closed { .. } => return,
            MountEvent::RelayFailed { source_id, .. } => {
                manager.fall_back_to_playlist(&mount, source_id);
            }
            MountEvent::SourceDisconnected { .. } if configured && !mount.has_source() => {
                manager.restore_default(&mount);
            }
            _ => {}
        }
    }
}
