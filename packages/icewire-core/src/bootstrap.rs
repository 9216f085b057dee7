//! Application bootstrap and dependency wiring.
//!
//! The composition root: the one place where the HTTP client, the mount
//! manager and the network context are created and wired together.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::context::NetworkContext;
use crate::error::{StreamError, StreamResult};
use crate::protocol_constants::SERVER_ID;
use crate::services::MountManager;
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Registry of mounts, already populated from the configuration.
    pub manager: Arc<MountManager>,
    /// Network configuration (port, advertise host).
    pub network: NetworkContext,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// State handed to the HTTP front end.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState::new(self.manager.clone(), self.network.clone())
    }

    /// Stops the accept loop, every source and every listener.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        let mounts = self.manager.shutdown();
        log::info!("[Bootstrap] Closed {} mount(s)", mounts);
    }
}

/// Creates the HTTP client relays share.
///
/// No overall request timeout: relay responses are endless streams. Stalls
/// are caught by the relay's own read timeout.
fn create_http_client(connect_timeout: Duration) -> StreamResult<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(SERVER_ID)
        .build()
        .map_err(|e| StreamError::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Validates the configuration, wires the services and starts the
/// configured mounts.
///
/// Must be called from inside a Tokio runtime.
pub fn bootstrap_services(
    config: Config,
    network: NetworkContext,
) -> StreamResult<BootstrappedServices> {
    config.validate().map_err(StreamError::Configuration)?;

    let http_client = create_http_client(config.streaming.source_timeout())?;
    let manager = MountManager::new(Arc::new(config), http_client);
    manager.start_configured()?;

    Ok(BootstrappedServices {
        manager,
        network,
        cancel_token: CancellationToken::new(),
    })
}
