//! Listener connections: bounded output queue and the ICY writer loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::icy::IcyInterleaver;
use super::mount::{Mount, MountInfo};
use crate::error::{StreamError, StreamResult};
use crate::protocol_constants::ICECAST_SERVER_HEADER;

/// Per-connection options parsed from the listener's request.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Client sent `Icy-MetaData: 1`.
    pub wants_metadata: bool,
    pub user_agent: Option<String>,
    pub peer: Option<String>,
}

struct QueueInner {
    chunks: VecDeque<Bytes>,
    bytes: usize,
    dropped: u64,
    closed: bool,
}

/// Byte-bounded FIFO of pending audio for one listener.
///
/// Pushing never blocks: when the ceiling would be exceeded the oldest
/// chunks are discarded. Holds raw audio only; ICY framing is applied when
/// chunks are written out, so dropping never breaks the metadata cadence.
pub struct ListenerQueue {
    inner: Mutex<QueueInner>,
    ceiling: usize,
    notify: Notify,
}

impl ListenerQueue {
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::new(),
                bytes: 0,
                dropped: 0,
                closed: false,
            }),
            ceiling: ceiling.max(1),
            notify: Notify::new(),
        }
    }

    /// Appends a chunk, dropping the oldest data to stay under the ceiling.
    ///
    /// Returns the number of bytes dropped.
    pub fn push(&self, mut chunk: Bytes) -> usize {
        let mut dropped = 0;
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return 0;
            }
            if chunk.len() > self.ceiling {
                dropped += chunk.len() - self.ceiling;
                chunk = chunk.slice(chunk.len() - self.ceiling..);
            }
            while inner.bytes + chunk.len() > self.ceiling {
                let Some(oldest) = inner.chunks.pop_front() else {
                    break;
                };
                inner.bytes -= oldest.len();
                dropped += oldest.len();
            }
            inner.bytes += chunk.len();
            inner.dropped += dropped as u64;
            inner.chunks.push_back(chunk);
        }
        self.notify.notify_one();
        dropped
    }

    /// Takes the next chunk without waiting.
    pub fn pop(&self) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let chunk = inner.chunks.pop_front()?;
        inner.bytes -= chunk.len();
        Some(chunk)
    }

    /// Waits for the next chunk. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<Bytes> {
        loop {
            if let Some(chunk) = self.pop() {
                return Some(chunk);
            }
            if self.inner.lock().closed {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Discards pending data and wakes the consumer.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.chunks.clear();
            inner.bytes = 0;
        }
        self.notify.notify_one();
    }

    /// Bytes currently queued.
    #[must_use]
    pub fn len_bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Total bytes discarded because of backpressure.
    #[must_use]
    pub fn dropped_bytes(&self) -> u64 {
        self.inner.lock().dropped
    }
}

fn header_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Builds the Icecast-style response head for a listener.
///
/// `icy-metaint` is only present when the client asked for metadata.
#[must_use]
pub fn response_head(info: &MountInfo, metaint: Option<usize>) -> String {
    let mut head = String::with_capacity(512);
    head.push_str("HTTP/1.0 200 OK\r\n");
    head.push_str(&format!("Server: {ICECAST_SERVER_HEADER}\r\n"));
    head.push_str(&format!(
        "Date: {}\r\n",
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
    ));
    head.push_str(&format!("Content-Type: {}\r\n", header_value(&info.content_type)));
    head.push_str(&format!("icy-name: {}\r\n", header_value(&info.name)));
    head.push_str(&format!("icy-genre: {}\r\n", header_value(&info.genre)));
    head.push_str(&format!("icy-description: {}\r\n", header_value(&info.description)));
    head.push_str(&format!("icy-br: {}\r\n", info.bitrate));
    head.push_str(&format!("icy-pub: {}\r\n", u8::from(info.public)));
    head.push_str(&format!("icy-url: {}\r\n", header_value(&info.url)));
    if let Some(metaint) = metaint {
        head.push_str(&format!("icy-metaint: {metaint}\r\n"));
    }
    head.push_str("Cache-Control: no-cache, no-store\r\n");
    head.push_str("Pragma: no-cache\r\n");
    head.push_str("Expires: Mon, 26 Jul 1997 05:00:00 GMT\r\n");
    head.push_str("Access-Control-Allow-Origin: *\r\n");
    head.push_str("Access-Control-Allow-Headers: Origin, Accept, X-Requested-With, Content-Type, Icy-MetaData\r\n");
    head.push_str("Access-Control-Allow-Methods: GET, OPTIONS, HEAD\r\n");
    head.push_str("Connection: Close\r\n\r\n");
    head
}

/// One outbound streaming connection.
///
/// States: attached (queue filling) → serving → stopped. `stop` is terminal
/// and idempotent.
pub struct Listener {
    id: Uuid,
    mount: Weak<Mount>,
    mount_path: String,
    options: ListenerOptions,
    metaint: usize,
    queue: ListenerQueue,
    cancel: CancellationToken,
    stopped: AtomicBool,
    bytes_sent: AtomicU64,
    connected_at: DateTime<Utc>,
}

impl Listener {
    /// Creates a listener and registers it on `mount`, queueing the burst.
    ///
    /// Fails without side effects when the mount has no source or is full.
    pub fn attach(mount: &Arc<Mount>, options: ListenerOptions) -> StreamResult<Arc<Self>> {
        let streaming = mount.streaming();
        let listener = Arc::new(Self {
            id: Uuid::new_v4(),
            mount: Arc::downgrade(mount),
            mount_path: mount.path().to_string(),
            metaint: streaming.icy_metaint,
            queue: ListenerQueue::new(streaming.listener_queue_bytes),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            connected_at: Utc::now(),
            options,
        });
        mount.attach_listener(listener.clone())?;
        Ok(listener)
    }

    /// Response head for a `HEAD` request, without attaching anything.
    pub fn head_only(mount: &Mount, wants_metadata: bool) -> StreamResult<String> {
        if !mount.has_source() {
            return Err(StreamError::NoSource(mount.path().to_string()));
        }
        let metaint = wants_metadata.then_some(mount.streaming().icy_metaint);
        Ok(response_head(&mount.info(), metaint))
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn queue(&self) -> &ListenerQueue {
        &self.queue
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn enqueue(&self, chunk: Bytes) {
        let dropped = self.queue.push(chunk);
        if dropped > 0 {
            log::trace!(
                "[Listener] {} on {} dropped {} bytes (slow client)",
                self.id,
                self.mount_path,
                dropped
            );
        }
    }

    /// Response head for this listener.
    #[must_use]
    pub fn response_head(&self, info: &MountInfo) -> String {
        response_head(info, self.options.wants_metadata.then_some(self.metaint))
    }

    /// Streams the mount to the client until either side goes away.
    ///
    /// `reader` is only watched for the client closing its end. Always stops
    /// the listener before returning. Returns the number of bytes written.
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: R, mut writer: W) -> StreamResult<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.pump(&mut reader, &mut writer).await;
        self.stop();
        let _ = writer.shutdown().await;
        log::debug!(
            "[Listener] {} on {} finished after {}s, {} bytes (dropped {}, agent {})",
            self.id,
            self.mount_path,
            (Utc::now() - self.connected_at).num_seconds(),
            self.bytes_sent(),
            self.queue.dropped_bytes(),
            self.options.user_agent.as_deref().unwrap_or("-")
        );
        result
    }

    async fn pump<R, W>(&self, reader: &mut R, writer: &mut W) -> StreamResult<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let info = match self.mount.upgrade() {
            Some(mount) => mount.info(),
            None => return Err(StreamError::MountNotFound(self.mount_path.clone())),
        };
        let head = self.response_head(&info);
        tokio::select! {
            res = writer.write_all(head.as_bytes()) => res?,
            _ = self.cancel.cancelled() => return Ok(0),
        }

        let mut interleaver = self
            .options
            .wants_metadata
            .then(|| IcyInterleaver::new(self.metaint));
        let mut scratch = [0u8; 256];

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = reader.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => {
                        log::debug!("[Listener] {} client closed connection", self.id);
                        break;
                    }
                    Ok(_) => {}
                },
                chunk = self.queue.next() => {
                    let Some(chunk) = chunk else { break };
                    let Some(mount) = self.mount.upgrade() else { break };
                    // Counters cover audio only, not interleaved metadata blocks.
                    let audio_len = chunk.len();
                    let out = match interleaver.as_mut() {
                        Some(interleaver) => interleaver.interleave(&chunk, &mount.metadata()),
                        None => chunk,
                    };
                    tokio::select! {
                        res = writer.write_all(&out) => {
                            if let Err(e) = res {
                                log::debug!("[Listener] {} write failed: {}", self.id, e);
                                break;
                            }
                        }
                        _ = self.cancel.cancelled() => break,
                    }
                    mount.record_sent(audio_len);
                    self.bytes_sent.fetch_add(audio_len as u64, Ordering::Relaxed);
                }
            }
        }
        Ok(self.bytes_sent())
    }

    /// Unregisters from the mount and ends the writer loop. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.queue.close();
        if let Some(mount) = self.mount.upgrade() {
            mount.remove_listener(self.id);
        }
    }
}
