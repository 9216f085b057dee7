//! Relay source: pulls an upstream ICY/Icecast stream into a mount.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{next_source_id, Source, SourceKind};
use crate::events::MountEvent;
use crate::protocol_constants::ICY_STREAM_TITLE;
use crate::state::RetryPolicy;
use crate::stream::{DemuxItem, IcyDemuxer, Mount, StreamMetadata};

/// Why a relay session ended.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("no data within {0:?}")]
    Timeout(Duration),

    #[error("upstream closed the stream")]
    Ended,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

struct RelayShared {
    mount: Weak<Mount>,
    mount_path: String,
    url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RelayShared {
    /// Runs one upstream connection until it fails or ends.
    ///
    /// Resets `failures` as soon as the upstream answers 200. `Ok` means the
    /// mount is gone and the relay should simply stop.
    async fn session(&self, failures: &mut u32) -> Result<(), RelayError> {
        log::info!("[Relay] {} connecting to {}", self.mount_path, self.url);
        let request = self
            .client
            .get(&self.url)
            .header("Icy-MetaData", "1")
            .send();
        let mut response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))??;

        if response.status().as_u16() != 200 {
            return Err(RelayError::Status(response.status().as_u16()));
        }
        *failures = 0;

        let headers = response.headers();
        let metaint = header_str(headers, "icy-metaint")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let Some(mount) = self.mount.upgrade() else {
            return Ok(());
        };
        let name = header_str(headers, "icy-name").map(str::to_string);
        let genre = header_str(headers, "icy-genre").map(str::to_string);
        let bitrate = header_str(headers, "icy-br").and_then(|v| v.parse::<u32>().ok());
        let content_type = header_str(headers, "content-type").map(str::to_string);
        mount.update_info(|info| {
            if let Some(name) = name {
                info.name = name;
            }
            if let Some(genre) = genre {
                info.genre = genre;
            }
            if let Some(bitrate) = bitrate {
                info.bitrate = bitrate;
            }
            if let Some(content_type) = content_type {
                info.content_type = content_type;
            }
        });
        drop(mount);

        log::info!(
            "[Relay] {} connected to {} (metaint: {})",
            self.mount_path,
            self.url,
            metaint
        );

        let mut demuxer = (metaint > 0).then(|| IcyDemuxer::new(metaint));
        loop {
            let chunk = tokio::time::timeout(self.timeout, response.chunk())
                .await
                .map_err(|_| RelayError::Timeout(self.timeout))??;
            let Some(chunk) = chunk else {
                return Err(RelayError::Ended);
            };
            let Some(mount) = self.mount.upgrade() else {
                return Ok(());
            };
            match demuxer.as_mut() {
                None => mount.push_audio(chunk),
                Some(demuxer) => {
                    for item in demuxer.feed(chunk) {
                        match item {
                            DemuxItem::Audio(audio) => mount.push_audio(audio),
                            DemuxItem::Metadata(pairs) => {
                                if let Some(title) = pairs.get(ICY_STREAM_TITLE) {
                                    mount.update_metadata(StreamMetadata::titled(title.clone()));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run(self: Arc<Self>, source_id: u64, cancel: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.session(&mut failures) => result,
            };
            let err = match result {
                Ok(()) => return,
                Err(err) => err,
            };

            failures += 1;
            if failures >= self.policy.max_attempts {
                log::error!(
                    "[Relay] {} giving up on {} after {} failures: {}",
                    self.mount_path,
                    self.url,
                    failures,
                    err
                );
                if let Some(mount) = self.mount.upgrade() {
                    mount.emit(MountEvent::RelayFailed {
                        mount: self.mount_path.clone(),
                        source_id,
                        attempts: failures,
                    });
                }
                return;
            }

            let delay = self.policy.delay_for(failures);
            log::warn!(
                "[Relay] {} {} ({}/{}), retrying in {:?}",
                self.mount_path,
                err,
                failures,
                self.policy.max_attempts,
                delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

struct Control {
    task: Option<CancellationToken>,
    stopped: bool,
}

/// Relays an upstream stream, reconnecting with exponential backoff.
pub struct RelaySource {
    id: u64,
    shared: Arc<RelayShared>,
    control: Mutex<Control>,
}

impl RelaySource {
    /// Creates a relay using the given client (proxy, TLS and pool settings).
    pub fn with_client(
        mount: &Arc<Mount>,
        url: impl Into<String>,
        policy: RetryPolicy,
        timeout: Duration,
        client: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_source_id(),
            shared: Arc::new(RelayShared {
                mount: Arc::downgrade(mount),
                mount_path: mount.path().to_string(),
                url: url.into(),
                client,
                policy,
                timeout,
            }),
            control: Mutex::new(Control {
                task: None,
                stopped: false,
            }),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    fn spawn(&self, control: &mut Control) {
        let cancel = CancellationToken::new();
        control.task = Some(cancel.clone());
        tokio::spawn(self.shared.clone().run(self.id, cancel));
    }
}

impl Source for RelaySource {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Relay
    }

    fn start(&self) {
        let mut control = self.control.lock();
        if control.stopped || control.task.is_some() {
            return;
        }
        self.spawn(&mut control);
    }

    fn stop(&self) {
        let mut control = self.control.lock();
        if control.stopped {
            return;
        }
        control.stopped = true;
        if let Some(task) = control.task.take() {
            task.cancel();
        }
        log::info!("[Relay] {} stopped", self.shared.mount_path);
    }

    fn supports_pause(&self) -> bool {
        true
    }

    /// Drops the upstream connection; `resume` reconnects with a fresh retry budget.
    fn pause(&self) {
        let mut control = self.control.lock();
        if let Some(task) = control.task.take() {
            task.cancel();
            log::info!("[Relay] {} paused", self.shared.mount_path);
        }
    }

    fn resume(&self) {
        let mut control = self.control.lock();
        if control.stopped || control.task.is_some() {
            return;
        }
        log::info!("[Relay] {} resumed", self.shared.mount_path);
        self.spawn(&mut control);
    }

    fn disconnect(&self) {
        let mut control = self.control.lock();
        if control.stopped {
            return;
        }
        if let Some(task) = control.task.take() {
            task.cancel();
        }
        log::info!("[Relay] {} reconnecting to {}", self.shared.mount_path, self.shared.url);
        self.spawn(&mut control);
    }

    fn describe(&self) -> String {
        self.shared.url.clone()
    }
}

impl Drop for RelaySource {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().task.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;

    use crate::state::{MountConfig, StreamingConfig};
    use crate::stream::{IcyInterleaver, StreamMetadata};

    /// Serves one canned response per connection; returns (url, accept count).
    async fn mock_upstream(
        respond: impl Fn(usize) -> Vec<u8> + Send + Sync + 'static,
    ) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (count, seen) = (accepted.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = count.fetch_add(1, Ordering::SeqCst);
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    if socket.read(&mut byte).await.unwrap_or(0) == 0 {
                        break;
                    }
                    head.push(byte[0]);
                }
                seen.lock().push(String::from_utf8_lossy(&head).into_owned());
                let _ = socket.write_all(&respond(n)).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/stream"), accepted, requests)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn mount() -> Arc<Mount> {
        Mount::new(
            MountConfig::relay("/relay", "http://unused"),
            &StreamingConfig::default(),
        )
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            max_attempts: 5,
        }
    }

    async fn next_relay_failed(events: &mut broadcast::Receiver<MountEvent>) -> Option<u32> {
        loop {
            match events.recv().await {
                Ok(MountEvent::RelayFailed { attempts, .. }) => return Some(attempts),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    #[tokio::test]
    async fn strips_metadata_and_republishes_title() {
        let audio: Vec<u8> = (0..48u8).collect();
        let mut interleaver = IcyInterleaver::new(16);
        let body = interleaver.interleave(&audio, &StreamMetadata::titled("Upstream's Song"));
        let response = {
            let mut r = b"HTTP/1.0 200 OK\r\nContent-Type: audio/mpeg\r\nicy-name: Up FM\r\nicy-genre: Jazz\r\nicy-metaint: 16\r\n\r\n".to_vec();
            r.extend_from_slice(&body);
            r
        };
        let (url, _, requests) = mock_upstream(move |_| response.clone()).await;

        let mount = mount();
        let mut events = mount.subscribe_events();
        let policy = RetryPolicy {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
        };
        let relay = RelaySource::with_client(&mount, url, policy, Duration::from_secs(5), client());
        mount.set_source(relay.clone());
        relay.start();

        let title = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(MountEvent::MetadataUpdated { title: Some(t), .. }) = events.recv().await {
                    return t;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(title, "Upstream's Song");

        tokio::time::timeout(Duration::from_secs(5), async {
            while mount.burst(1024).len() < audio.len() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(&mount.burst(1024)[..], &audio[..]);

        let info = mount.info();
        assert_eq!(info.name, "Up FM");
        assert_eq!(info.genre, "Jazz");
        assert!(requests.lock()[0].to_ascii_lowercase().contains("icy-metadata: 1"));
        relay.stop();
    }

    #[tokio::test]
    async fn gives_up_after_max_consecutive_failures() {
        let (url, accepted, _) =
            mock_upstream(|_| b"HTTP/1.0 503 Service Unavailable\r\n\r\n".to_vec()).await;
        let mount = mount();
        let mut events = mount.subscribe_events();
        let relay = RelaySource::with_client(&mount, url, fast_policy(), Duration::from_secs(5), client());
        relay.start();

        let attempts = tokio::time::timeout(Duration::from_secs(5), next_relay_failed(&mut events))
            .await
            .unwrap();
        assert_eq!(attempts, Some(5));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 5);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), next_relay_failed(&mut events))
                .await
                .is_err(),
            "only one failure notification"
        );
    }

    #[tokio::test]
    async fn successful_connects_reset_the_failure_count() {
        // Every connection succeeds and then ends, so failures never stack up.
        let (url, accepted, _) = mock_upstream(|_| {
            b"HTTP/1.0 200 OK\r\nContent-Type: audio/mpeg\r\n\r\nabcd".to_vec()
        })
        .await;
        let mount = mount();
        let mut events = mount.subscribe_events();
        let relay = RelaySource::with_client(&mount, url, fast_policy(), Duration::from_secs(5), client());
        relay.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while accepted.load(Ordering::SeqCst) < 8 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        relay.stop();

        assert!(
            tokio::time::timeout(Duration::from_millis(50), next_relay_failed(&mut events))
                .await
                .is_err()
        );
        assert!(mount.stats().bytes_in >= 4 * 7);
    }

    #[tokio::test]
    async fn stop_cancels_pending_retry() {
        let (url, accepted, _) =
            mock_upstream(|_| b"HTTP/1.0 500 Internal Server Error\r\n\r\n".to_vec()).await;
        let mount = mount();
        let policy = RetryPolicy {
            initial_delay_ms: 200,
            max_delay_ms: 200,
            max_attempts: 5,
        };
        let relay = RelaySource::with_client(&mount, url, policy, Duration::from_secs(5), client());
        relay.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while accepted.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        relay.stop();
        relay.stop();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
