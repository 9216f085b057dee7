//! HTTP front end.
//!
//! One TCP accept loop serves everything on a single port. Streaming
//! requests (source uploads, listeners) are handled on the raw socket in
//! [`connection`]; the rest goes through the axum router in [`http`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::services::MountManager;
use crate::state::Config;

pub mod connection;
pub mod http;
pub mod response;
pub mod status;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the front end.
///
/// Thin wrapper around the services; all logic lives in them.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<MountManager>,
    /// Port and advertise host for listen URLs.
    pub network: NetworkContext,
    /// When the server came up, reported in the status document.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(manager: Arc<MountManager>, network: NetworkContext) -> Self {
        Self {
            manager,
            network,
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        self.manager.config()
    }
}

/// Binds `0.0.0.0` on the context's port and serves until `cancel` fires.
///
/// A port of 0 picks a free one; the chosen port is written back into the
/// network context.
pub async fn start_server(state: AppState, cancel: CancellationToken) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.network.get_port()));
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    state.network.set_port(port);

    log::info!("[Server] Listening on http://0.0.0.0:{}", port);
    log::info!("[Server] Status: {}", state.network.url_builder().status_url());
    serve(listener, state, cancel).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let router = http::create_router(state.clone());
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[Server] Accept loop stopped");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    log::warn!("[Server] Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Server] Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let state = state.clone();
        let router = router.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = connection::handle_connection(state, router, stream, Some(peer)) => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn serves_over_tcp_until_cancelled() {
        let config = Config {
            mounts: Vec::new(),
            ..Config::default()
        };
        let manager = MountManager::new(Arc::new(config), reqwest::Client::new());
        let state = AppState::new(manager, NetworkContext::for_test());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state, cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("is running"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
