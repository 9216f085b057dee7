//! Network configuration context for the server.
//!
//! [`NetworkContext`] carries the port and the host name listeners should use
//! to reach us. The host is either given explicitly (`advertise_host`) or
//! detected from the local interfaces.

use std::sync::Arc;

use parking_lot::RwLock;

/// Network configuration shared across services.
#[derive(Clone)]
pub struct NetworkContext {
    /// Server port (0 until the listener is bound when auto-assigned).
    pub port: Arc<RwLock<u16>>,
    /// Host name or IP advertised in listen URLs.
    pub advertise_host: Arc<RwLock<String>>,
}

impl NetworkContext {
    /// Creates a context with a known advertise host.
    #[must_use]
    pub fn explicit(bind_port: u16, advertise_host: impl Into<String>) -> Self {
        Self {
            port: Arc::new(RwLock::new(bind_port)),
            advertise_host: Arc::new(RwLock::new(advertise_host.into())),
        }
    }

    /// Creates a context whose host comes from `detector`.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails.
    pub fn auto_detect(bind_port: u16, detector: &dyn IpDetector) -> Result<Self, NetworkError> {
        Ok(Self::explicit(bind_port, detector.detect()?))
    }

    /// Uses `advertise_host` when given, otherwise detects the local IP and
    /// falls back to `localhost`.
    #[must_use]
    pub fn resolve(bind_port: u16, advertise_host: Option<&str>) -> Self {
        if let Some(host) = advertise_host.filter(|h| !h.trim().is_empty()) {
            return Self::explicit(bind_port, host.trim());
        }
        match Self::auto_detect(bind_port, &LocalIpDetector) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("[Network] {}, advertising localhost", e);
                Self::explicit(bind_port, "localhost")
            }
        }
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit(8000, "127.0.0.1")
    }

    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    #[must_use]
    pub fn get_advertise_host(&self) -> String {
        self.advertise_host.read().clone()
    }

    /// Records the port actually bound.
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
    }

    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.get_advertise_host(), self.get_port())
    }

    /// Public URL of a mount.
    #[must_use]
    pub fn listen_url(&self, mount: &str) -> String {
        self.url_builder().listen_url(mount)
    }
}

/// Strategy for finding the address listeners can reach.
pub trait IpDetector: Send + Sync {
    fn detect(&self) -> Result<String, NetworkError>;
}

/// Detects the primary local IP from the system's interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIpDetector;

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to detect local IP: {0}")]
    Detection(String),
}

/// Builds URLs pointing at this server.
pub struct UrlBuilder {
    host: String,
    port: u16,
}

impl UrlBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`; IPv6 literals are bracketed.
    #[must_use]
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    #[must_use]
    pub fn listen_url(&self, mount: &str) -> String {
        format!("{}{}", self.base_url(), mount)
    }

    #[must_use]
    pub fn status_url(&self) -> String {
        format!("{}/status-json.xsl", self.base_url())
    }
}
