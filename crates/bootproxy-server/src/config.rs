//! Configuration types for the proxy server.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listen port for the image proxy.
pub const DEFAULT_PORT: u16 = 8083;

/// Default architecture boot images are resolved for.
pub const DEFAULT_ARCHITECTURE: &str = "amd64";

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Architecture used when a request needs manifest resolution.
    pub architecture: String,

    /// How long a rendered config drive stays cached.
    pub config_drive_ttl: Duration,

    /// Upper bound on cached config-drive bytes.
    pub config_drive_max_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            config_drive_ttl: Duration::from_secs(5 * 60),
            config_drive_max_size: 100 * 1024 * 1024, // 100MiB
        }
    }
}

impl ServerConfig {
    /// Creates a new config with the given bind address.
    #[must_use]
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Sets the target architecture.
    #[must_use]
    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = architecture.into();
        self
    }

    /// Sets the config-drive cache TTL.
    #[must_use]
    pub fn with_config_drive_ttl(mut self, ttl: Duration) -> Self {
        self.config_drive_ttl = ttl;
        self
    }

    /// Sets the config-drive cache size limit in bytes.
    #[must_use]
    pub fn with_config_drive_max_size(mut self, max_size: usize) -> Self {
        self.config_drive_max_size = max_size;
        self
    }
}
