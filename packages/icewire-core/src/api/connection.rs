//! Per-connection request handling below the HTTP framework.
//!
//! Icecast clients do not speak clean HTTP: source clients send `SOURCE`
//! requests or stream an unbounded `PUT` body, and ICY players expect a raw
//! header block followed by an endless byte stream with no chunked encoding.
//! So every connection starts here. The head is parsed by hand; streaming
//! requests are served directly on the socket and everything else is replayed
//! into the axum router as a one-shot request.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tower::ServiceExt;

use crate::api::AppState;
use crate::error::{StreamError, StreamResult};
use crate::protocol_constants::{
    ICECAST_SERVER_HEADER, MAX_ADMIN_BODY_SIZE, MAX_REQUEST_HEAD_SIZE, REQUEST_HEAD_TIMEOUT_SECS,
};
use crate::source::{IceHeaders, LiveSourceRequest};
use crate::stream::{Listener, ListenerOptions};

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
Access-Control-Allow-Methods: GET, HEAD, PUT, POST, OPTIONS\r\n\
Access-Control-Allow-Headers: Icy-MetaData, Range, Accept, Authorization, Content-Type\r\n\
Access-Control-Expose-Headers: icy-br, icy-genre, icy-name, icy-url, icy-pub, icy-metaint, Content-Type\r\n";

// ─────────────────────────────────────────────────────────────────────────────
// Request Head
// ─────────────────────────────────────────────────────────────────────────────

/// Request line and headers of one client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target as sent (path plus query).
    pub target: String,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses the text before the blank line.
    ///
    /// Accepts `ICE/1.0` and a missing version, which old source clients send.
    pub fn parse(raw: &str) -> StreamResult<Self> {
        let mut lines = raw.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Err(StreamError::InvalidRequest("Malformed request line".into()));
        };
        let version = parts.next().unwrap_or("HTTP/1.0").to_string();
        if !target.starts_with('/') {
            return Err(StreamError::InvalidRequest(format!(
                "Unsupported request target: {target}"
            )));
        }
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .filter(|(name, _)| !name.is_empty())
            .collect();

        Ok(Self {
            method: method.to_ascii_uppercase(),
            target: target.to_string(),
            path,
            query,
            version,
            headers,
        })
    }

    /// First value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> StreamResult<usize> {
        match self.header("content-length") {
            None => Ok(0),
            Some(value) => value
                .parse()
                .map_err(|_| StreamError::InvalidRequest("Bad Content-Length".into())),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads a request head, returning it with any bytes that followed it.
///
/// `Ok(None)` means the client closed the connection before sending anything.
pub async fn read_head<R>(reader: &mut R) -> StreamResult<Option<(RequestHead, Bytes)>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(2048);
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = buf.split_to(end + 4);
            let raw = std::str::from_utf8(&head[..end])
                .map_err(|_| StreamError::InvalidRequest("Request head is not UTF-8".into()))?;
            return Ok(Some((RequestHead::parse(raw)?, buf.freeze())));
        }
        if buf.len() > MAX_REQUEST_HEAD_SIZE {
            return Err(StreamError::InvalidRequest("Request head too large".into()));
        }
        buf.reserve(4096);
        if reader.read_buf(&mut buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(StreamError::InvalidRequest("Connection closed mid-request".into()))
            };
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Serves one client connection to completion.
pub async fn handle_connection<S>(state: AppState, router: Router, stream: S, peer: Option<SocketAddr>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer_label = peer.map_or_else(|| "unknown".to_string(), |p| p.to_string());
    let (mut reader, mut writer) = tokio::io::split(stream);

    let head_timeout = Duration::from_secs(REQUEST_HEAD_TIMEOUT_SECS);
    let (head, leftover) = match tokio::time::timeout(head_timeout, read_head(&mut reader)).await {
        Err(_) => {
            log::debug!("[Server] {} sent no request within {:?}", peer_label, head_timeout);
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Ok(Some(parsed))) => parsed,
        Ok(Err(e)) => {
            log::debug!("[Server] Bad request from {}: {}", peer_label, e);
            let _ = writer.write_all(&e.to_raw_response()).await;
            let _ = writer.shutdown().await;
            return;
        }
    };
    log::debug!("[Server] {} {} from {}", head.method, head.target, peer_label);

    let result = match head.method.as_str() {
        "PUT" | "SOURCE" => handle_source(&state, &head, leftover, reader, &mut writer, peer).await,
        "GET" | "HEAD" if state.manager.get(&head.path).is_some() => {
            handle_listener(&state, &head, reader, &mut writer, peer).await
        }
        "OPTIONS" => write_options(&mut writer).await,
        _ => handle_control(router, &head, leftover, &mut reader, &mut writer).await,
    };
    if let Err(e) = result {
        log::debug!("[Server] Connection from {} ended with error: {}", peer_label, e);
    }
    let _ = writer.shutdown().await;
}

async fn write_options<W>(writer: &mut W) -> StreamResult<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!("HTTP/1.0 204 No Content\r\n{CORS_HEADERS}Connection: close\r\n\r\n");
    writer.write_all(response.as_bytes()).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Live Sources
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_source<R, W>(
    state: &AppState,
    head: &RequestHead,
    leftover: Bytes,
    reader: R,
    writer: &mut W,
    peer: Option<SocketAddr>,
) -> StreamResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = LiveSourceRequest {
        mount: head.path.clone(),
        content_type: head.header("content-type").map(str::to_string),
        authorization: head.header("authorization").map(str::to_string),
        ice: IceHeaders::from_pairs(head.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))),
        peer: peer.map(|p| p.to_string()),
    };

    let (mount, session) = match state.manager.accept_live(&request) {
        Ok(accepted) => accepted,
        Err(e) => {
            log::warn!(
                "[Server] Rejected source for {} from {}: {}",
                head.path,
                request.peer.as_deref().unwrap_or("unknown"),
                e
            );
            writer.write_all(&e.to_raw_response()).await?;
            return Ok(());
        }
    };
    let streaming = mount.streaming().clone();
    drop(mount);

    let expects_continue = head
        .header("expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
    let accepted = async {
        if expects_continue {
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        }
        let ok = format!("HTTP/1.0 200 OK\r\nServer: {ICECAST_SERVER_HEADER}\r\nConnection: Close\r\n\r\n");
        writer.write_all(ok.as_bytes()).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = accepted {
        // The session owns the slot; let it hand the slot back before bailing.
        session.handle().stop();
        session
            .run(tokio::io::empty(), Bytes::new(), streaming.source_timeout(), streaming.watchdog_interval())
            .await;
        return Err(e.into());
    }

    session
        .run(reader, leftover, streaming.source_timeout(), streaming.watchdog_interval())
        .await;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Listeners
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_listener<R, W>(
    state: &AppState,
    head: &RequestHead,
    reader: R,
    writer: &mut W,
    peer: Option<SocketAddr>,
) -> StreamResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(mount) = state.manager.get(&head.path) else {
        writer
            .write_all(&StreamError::MountNotFound(head.path.clone()).to_raw_response())
            .await?;
        return Ok(());
    };
    let wants_metadata = head.header("icy-metadata").is_some_and(|v| v.trim() == "1");

    if head.method == "HEAD" {
        let response = match Listener::head_only(&mount, wants_metadata) {
            Ok(head) => head.into_bytes(),
            Err(e) => e.to_raw_response(),
        };
        writer.write_all(&response).await?;
        return Ok(());
    }

    let options = ListenerOptions {
        wants_metadata,
        user_agent: head.header("user-agent").map(str::to_string),
        peer: peer.map(|p| p.to_string()),
    };
    let listener = match Listener::attach(&mount, options) {
        Ok(listener) => listener,
        Err(e) => {
            log::info!("[Server] Refused listener on {}: {}", head.path, e);
            writer.write_all(&e.to_raw_response()).await?;
            return Ok(());
        }
    };
    drop(mount);
    listener.serve(reader, writer).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Control Plane
// ─────────────────────────────────────────────────────────────────────────────

async fn read_body<R>(head: &RequestHead, leftover: Bytes, reader: &mut R) -> StreamResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let length = head.content_length()?;
    if length > MAX_ADMIN_BODY_SIZE {
        return Err(StreamError::InvalidRequest("Request body too large".into()));
    }
    if leftover.len() >= length {
        return Ok(leftover.slice(..length));
    }
    let mut body = BytesMut::with_capacity(length);
    body.extend_from_slice(&leftover);
    while body.len() < length {
        if reader.read_buf(&mut body).await? == 0 {
            return Err(StreamError::InvalidRequest("Request body truncated".into()));
        }
    }
    body.truncate(length);
    Ok(body.freeze())
}

async fn handle_control<R, W>(
    router: Router,
    head: &RequestHead,
    leftover: Bytes,
    reader: &mut R,
    writer: &mut W,
) -> StreamResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let body = match read_body(head, leftover, reader).await {
        Ok(body) => body,
        Err(e) => {
            writer.write_all(&e.to_raw_response()).await?;
            return Ok(());
        }
    };

    let mut builder = Request::builder()
        .method(head.method.as_str())
        .uri(head.target.as_str());
    for (name, value) in &head.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let request = match builder.body(Body::from(body)) {
        Ok(request) => request,
        Err(e) => {
            let err = StreamError::InvalidRequest(e.to_string());
            writer.write_all(&err.to_raw_response()).await?;
            return Ok(());
        }
    };

    let response = match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| StreamError::Internal(e.to_string()))?;

    let mut out = format!(
        "HTTP/1.0 {} {}\r\n",
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or("")
    );
    for (name, value) in &parts.headers {
        if name == header::CONTENT_LENGTH || name == header::CONNECTION {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    out.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));
    writer.write_all(out.as_bytes()).await?;
    if head.method != "HEAD" {
        writer.write_all(&body).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tokio::io::{duplex, DuplexStream};

    use crate::api::http::create_router;
    use crate::context::NetworkContext;
    use crate::services::MountManager;
    use crate::source::SourceKind;
    use crate::state::{Config, StreamingConfig};
    use crate::stream::mount::tests::StubSource;

    fn state_with(streaming: StreamingConfig) -> AppState {
        let config = Config {
            mounts: Vec::new(),
            streaming,
            ..Config::default()
        };
        let manager = MountManager::new(Arc::new(config), reqwest::Client::new());
        AppState::new(manager, NetworkContext::for_test())
    }

    /// Spawns the connection handler and returns the client end.
    fn connect(state: &AppState) -> DuplexStream {
        let (client, server) = duplex(64 * 1024);
        let router = create_router(state.clone());
        tokio::spawn(handle_connection(state.clone(), router, server, None));
        client
    }

    async fn read_until(client: &mut DuplexStream, needle: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        tokio::time::timeout(Duration::from_secs(5), async {
            while !out.windows(needle.len()).any(|w| w == needle) {
                let n = client.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed early: {:?}", String::from_utf8_lossy(&out));
                out.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .unwrap();
        out
    }

    async fn read_all(mut client: DuplexStream) -> String {
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    fn source_auth() -> String {
        format!("Basic {}", STANDARD.encode("source:hackme"))
    }

    mod parsing {
        use super::*;

        #[test]
        fn parses_source_request() {
            let head = RequestHead::parse(
                "SOURCE /live?x=1 ICE/1.0\r\nContent-Type: audio/mpeg\r\nice-name: Show\r\nbroken line",
            )
            .unwrap();
            assert_eq!(head.method, "SOURCE");
            assert_eq!(head.path, "/live");
            assert_eq!(head.query.as_deref(), Some("x=1"));
            assert_eq!(head.version, "ICE/1.0");
            assert_eq!(head.header("content-type"), Some("audio/mpeg"));
            assert_eq!(head.header("ICE-NAME"), Some("Show"));
            assert_eq!(head.headers.len(), 2);
        }

        #[test]
        fn rejects_garbage_request_lines() {
            assert!(RequestHead::parse("HELLO").is_err());
            assert!(RequestHead::parse("GET http://elsewhere/ HTTP/1.1").is_err());
        }

        #[tokio::test]
        async fn read_head_keeps_trailing_body_bytes() {
            let data = b"PUT /m HTTP/1.1\r\nContent-Type: audio/mpeg\r\n\r\nAUDIO".to_vec();
            let mut reader = &data[..];
            let (head, rest) = read_head(&mut reader).await.unwrap().unwrap();
            assert_eq!(head.method, "PUT");
            assert_eq!(&rest[..], b"AUDIO");
        }

        #[tokio::test]
        async fn read_head_enforces_size_limit() {
            let data = vec![b'a'; MAX_REQUEST_HEAD_SIZE + 10_000];
            let mut reader = &data[..];
            assert_eq!(
                read_head(&mut reader).await.err(),
                Some(StreamError::InvalidRequest("Request head too large".into()))
            );
            let mut empty: &[u8] = &[];
            assert_eq!(read_head(&mut empty).await.unwrap(), None);
        }
    }

    mod streaming {
        use super::*;

        #[tokio::test]
        async fn listener_gets_icy_headers_and_burst() {
            let state = state_with(StreamingConfig::default());
            let mount = state.manager.get_or_create("/stream").unwrap();
            mount.set_source(StubSource::new(SourceKind::Playlist));
            mount.push_audio(Bytes::from_static(b"BURST"));

            let mut client = connect(&state);
            client
                .write_all(b"GET /stream HTTP/1.1\r\nIcy-MetaData: 1\r\n\r\n")
                .await
                .unwrap();
            let received = read_until(&mut client, b"BURST").await;
            let text = String::from_utf8_lossy(&received);
            assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
            assert!(text.contains("Server: Icecast 2.4.4\r\n"));
            assert!(text.contains("icy-metaint: 16000\r\n"));
            assert!(text.contains("icy-name: stream\r\n"));
            assert!(!text.contains("Transfer-Encoding"));
            assert_eq!(mount.listener_count(), 1);

            drop(client);
            tokio::time::timeout(Duration::from_secs(5), async {
                while mount.listener_count() > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
            state.manager.shutdown();
        }

        #[tokio::test]
        async fn mount_without_source_is_not_found() {
            let state = state_with(StreamingConfig::default());
            state.manager.get_or_create("/empty").unwrap();

            let mut client = connect(&state);
            client.write_all(b"GET /empty HTTP/1.0\r\n\r\n").await.unwrap();
            let text = read_all(client).await;
            assert!(text.starts_with("HTTP/1.0 404 Not Found\r\n"));
            assert!(text.ends_with("No source on mount: /empty"));
            state.manager.shutdown();
        }

        #[tokio::test]
        async fn full_mount_rejects_without_touching_existing_listener() {
            let state = state_with(StreamingConfig {
                max_listeners_per_mount: 1,
                ..StreamingConfig::default()
            });
            let mount = state.manager.get_or_create("/full").unwrap();
            mount.set_source(StubSource::new(SourceKind::Playlist));

            let mut first = connect(&state);
            first.write_all(b"GET /full HTTP/1.0\r\n\r\n").await.unwrap();
            read_until(&mut first, b"\r\n\r\n").await;

            let mut second = connect(&state);
            second.write_all(b"GET /full HTTP/1.0\r\n\r\n").await.unwrap();
            let text = read_all(second).await;
            assert!(text.starts_with("HTTP/1.0 503 Service Unavailable\r\n"));

            mount.push_audio(Bytes::from_static(b"still flowing"));
            read_until(&mut first, b"still flowing").await;
            assert_eq!(mount.listener_count(), 1);
            state.manager.shutdown();
        }

        #[tokio::test]
        async fn head_request_returns_headers_only() {
            let state = state_with(StreamingConfig::default());
            let mount = state.manager.get_or_create("/h").unwrap();
            mount.set_source(StubSource::new(SourceKind::Playlist));

            let mut client = connect(&state);
            client.write_all(b"HEAD /h HTTP/1.1\r\n\r\n").await.unwrap();
            let text = read_all(client).await;
            assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
            assert!(text.ends_with("\r\n\r\n"));
            assert!(!text.contains("icy-metaint"));
            assert_eq!(mount.listener_count(), 0);
            state.manager.shutdown();
        }
    }

    mod sources {
        use super::*;

        #[tokio::test]
        async fn put_upload_feeds_mount() {
            let state = state_with(StreamingConfig::default());
            let mut client = connect(&state);
            let request = format!(
                "PUT /live HTTP/1.1\r\nAuthorization: {}\r\nContent-Type: audio/ogg\r\nIce-Name: Live Set\r\nExpect: 100-continue\r\n\r\nFIRST",
                source_auth()
            );
            client.write_all(request.as_bytes()).await.unwrap();
            let reply = read_until(&mut client, b"200 OK\r\n").await;
            assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 100 Continue\r\n\r\n"));

            client.write_all(b"SECOND").await.unwrap();
            let mount = state.manager.get("/live").unwrap();
            tokio::time::timeout(Duration::from_secs(5), async {
                while mount.stats().bytes_in < 11 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
            assert_eq!(&mount.burst(64)[..], b"FIRSTSECOND");
            assert_eq!(mount.info().name, "Live Set");
            assert_eq!(mount.info().content_type, "audio/ogg");
            assert_eq!(mount.source().map(|s| s.kind()), Some(SourceKind::Live));

            drop(client);
            tokio::time::timeout(Duration::from_secs(5), async {
                while mount.has_source() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
            state.manager.shutdown();
        }

        #[tokio::test]
        async fn source_rejections_are_plain_http() {
            let state = state_with(StreamingConfig::default());

            let mut client = connect(&state);
            let request = format!("SOURCE /x ICE/1.0\r\nAuthorization: {}\r\n\r\n", source_auth());
            client.write_all(request.as_bytes()).await.unwrap();
            let text = read_all(client).await;
            assert!(text.starts_with("HTTP/1.0 403 Forbidden\r\n"));
            assert!(text.ends_with("No Content-Type given"));

            let mut client = connect(&state);
            client
                .write_all(b"SOURCE /x ICE/1.0\r\nContent-Type: audio/mpeg\r\n\r\n")
                .await
                .unwrap();
            let text = read_all(client).await;
            assert!(text.starts_with("HTTP/1.0 401 Unauthorized\r\n"));
            assert!(text.contains("WWW-Authenticate: Basic realm=\"Icecast\"\r\n"));
            assert!(state.manager.get("/x").is_none());
        }
    }

    mod control {
        use super::*;

        #[tokio::test]
        async fn options_answers_cors_preflight() {
            let state = state_with(StreamingConfig::default());
            let mut client = connect(&state);
            client.write_all(b"OPTIONS /stream HTTP/1.1\r\n\r\n").await.unwrap();
            let text = read_all(client).await;
            assert!(text.starts_with("HTTP/1.0 204 No Content\r\n"));
            assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        }

        #[tokio::test]
        async fn status_is_routed_through_axum() {
            let state = state_with(StreamingConfig::default());
            state.manager.get_or_create("/one").unwrap();
            let mut client = connect(&state);
            client
                .write_all(b"GET /status-json.xsl HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let text = read_all(client).await;
            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
            assert!(head.contains(&format!("Content-Length: {}", body.len())));
            let json: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(json["icestats"]["source"]["listenurl"], "http://127.0.0.1:8000/one");
            state.manager.shutdown();
        }

        #[tokio::test]
        async fn admin_post_body_is_forwarded() {
            let state = state_with(StreamingConfig::default());
            let mut client = connect(&state);
            let body = "{oops";
            let request = format!(
                "POST /admin/source HTTP/1.1\r\nAuthorization: Basic {}\r\nContent-Length: {}\r\n\r\n{}",
                STANDARD.encode("admin:admin"),
                body.len(),
                body
            );
            client.write_all(request.as_bytes()).await.unwrap();
            let text = read_all(client).await;
            assert!(text.starts_with("HTTP/1.0 400 Bad Request\r\n"));
            assert!(text.contains("Invalid JSON"));
        }
    }
}
