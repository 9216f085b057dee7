//! Live source ingestion (PUT / legacy SOURCE uploads).
//!
//! A live uploader pre-empts whatever is playing: the previous source is
//! paused, not stopped, and takes the slot back when the upload ends for any
//! reason.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{next_source_id, Source, SourceKind};
use crate::auth::require_password;
use crate::error::{StreamError, StreamResult};
use crate::protocol_constants::{SOURCE_AUTH_REALM, SOURCE_READ_BUFFER_SIZE};
use crate::stream::Mount;

/// `ice-*` headers describing the uploaded stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceHeaders {
    pub name: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub bitrate: Option<u32>,
    pub url: Option<String>,
    pub public: Option<bool>,
}

impl IceHeaders {
    /// Collects the recognized headers from `(name, value)` pairs.
    ///
    /// Header names are matched case-insensitively; empty values are ignored.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut ice = Self::default();
        for (name, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.to_ascii_lowercase().as_str() {
                "ice-name" => ice.name = Some(value.to_string()),
                "ice-genre" => ice.genre = Some(value.to_string()),
                "ice-description" => ice.description = Some(value.to_string()),
                "ice-bitrate" => ice.bitrate = value.parse().ok(),
                "ice-url" => ice.url = Some(value.to_string()),
                "ice-public" => ice.public = Some(value == "1"),
                _ => {}
            }
        }
        ice
    }
}

/// The parts of an upload request the ingestion logic looks at.
#[derive(Debug, Clone, Default)]
pub struct LiveSourceRequest {
    pub mount: String,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub ice: IceHeaders,
    pub peer: Option<String>,
}

impl LiveSourceRequest {
    /// Protocol checks that need no mount: content type first, then password.
    pub fn check(&self, source_password: &str) -> StreamResult<()> {
        if self
            .content_type
            .as_deref()
            .map_or(true, |ct| ct.trim().is_empty())
        {
            return Err(StreamError::MissingContentType);
        }
        require_password(
            self.authorization.as_deref(),
            source_password,
            SOURCE_AUTH_REALM,
        )?;
        Ok(())
    }
}

/// Source-slot entry for a live upload. `stop` terminates the connection.
pub struct LiveHandle {
    id: u64,
    peer: String,
    kill: CancellationToken,
}

impl LiveHandle {
    fn new(peer: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: next_source_id(),
            peer: peer.unwrap_or_else(|| "unknown".to_string()),
            kill: CancellationToken::new(),
        })
    }
}

impl Source for LiveHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn start(&self) {}

    fn stop(&self) {
        self.kill.cancel();
    }

    fn disconnect(&self) {
        self.kill.cancel();
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

/// How a live upload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    /// The uploader closed the connection.
    End,
    /// Reading from the uploader failed.
    Error(String),
    /// Nothing arrived within the silence timeout.
    TimedOut,
    /// Stopped from outside (admin kill, source switch, mount removal).
    Killed,
}

/// An accepted live upload that owns the mount's source slot.
pub struct LiveSession {
    mount: Weak<Mount>,
    mount_path: String,
    handle: Arc<LiveHandle>,
    previous: Option<Arc<dyn Source>>,
}

impl LiveSession {
    /// Claims `mount` for a live upload that already passed [`LiveSourceRequest::check`].
    ///
    /// Fails with `MountInUse` if another live source is active. On success
    /// the previous source is paused and the mount's display attributes are
    /// taken from the request.
    pub fn begin(mount: &Arc<Mount>, request: &LiveSourceRequest) -> StreamResult<Self> {
        let handle = LiveHandle::new(request.peer.clone());
        let previous = mount.claim_live(handle.clone())?;

        let previous = match previous {
            Some(source) if source.supports_pause() => {
                source.pause();
                Some(source)
            }
            Some(source) => {
                source.stop();
                None
            }
            None => None,
        };

        let ice = request.ice.clone();
        let content_type = request.content_type.clone();
        mount.update_info(|info| {
            if let Some(name) = ice.name {
                info.name = name;
            }
            if let Some(genre) = ice.genre {
                info.genre = genre;
            }
            if let Some(description) = ice.description {
                info.description = description;
            }
            if let Some(bitrate) = ice.bitrate {
                info.bitrate = bitrate;
            }
            if let Some(url) = ice.url {
                info.url = url;
            }
            if let Some(public) = ice.public {
                info.public = public;
            }
            if let Some(content_type) = content_type {
                info.content_type = content_type;
            }
        });

        log::info!(
            "[Live] Source {} connected to {} ({})",
            handle.describe(),
            mount.path(),
            request.content_type.as_deref().unwrap_or_default()
        );

        Ok(Self {
            mount: Arc::downgrade(mount),
            mount_path: mount.path().to_string(),
            handle,
            previous,
        })
    }

    /// The slot entry for this upload.
    #[must_use]
    pub fn handle(&self) -> Arc<dyn Source> {
        self.handle.clone()
    }

    /// Pushes uploaded bytes into the mount until the upload ends.
    ///
    /// `initial` holds body bytes that arrived together with the request
    /// head. The watchdog checks every `watchdog_interval` whether more than
    /// `timeout` passed since the last byte. The previous source is restored
    /// before returning.
    pub async fn run<R>(
        self,
        mut reader: R,
        initial: Bytes,
        timeout: Duration,
        watchdog_interval: Duration,
    ) -> LiveOutcome
    where
        R: AsyncRead + Unpin,
    {
        if let Some(mount) = self.mount.upgrade() {
            mount.push_audio(initial);
        }

        let mut last_rx = Instant::now();
        let mut watchdog =
            tokio::time::interval_at(Instant::now() + watchdog_interval, watchdog_interval);
        let mut buf = vec![0u8; SOURCE_READ_BUFFER_SIZE];

        let outcome = loop {
            tokio::select! {
                _ = self.handle.kill.cancelled() => break LiveOutcome::Killed,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break LiveOutcome::End,
                    Ok(n) => {
                        last_rx = Instant::now();
                        let Some(mount) = self.mount.upgrade() else {
                            break LiveOutcome::Killed;
                        };
                        mount.push_audio(Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) => break LiveOutcome::Error(e.to_string()),
                },
                _ = watchdog.tick() => {
                    if last_rx.elapsed() > timeout {
                        break LiveOutcome::TimedOut;
                    }
                }
            }
        };

        log::info!(
            "[Live] Source {} disconnected from {}: {:?}",
            self.handle.describe(),
            self.mount_path,
            outcome
        );
        self.finish();
        outcome
    }

    /// Gives the slot back to the paused source, or stops it if it cannot be.
    fn finish(self) {
        let mount = self.mount.upgrade();
        let released = mount
            .as_ref()
            .is_some_and(|m| m.release_live(self.handle.id, self.previous.clone()));
        match self.previous {
            Some(previous) if released => {
                log::info!(
                    "[Live] Resuming {} #{} on {}",
                    previous.kind(),
                    previous.id(),
                    self.mount_path
                );
                previous.resume();
            }
            Some(previous) => previous.stop(),
            None => {}
        }
    }
}
