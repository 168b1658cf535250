//! Configuration types for the registry client.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Timeout for auth probes, token exchanges and manifest fetches.
    ///
    /// Blob streams are not bounded by this timeout.
    pub request_timeout: Duration,

    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// Registry domains contacted over plain HTTP.
    pub insecure_registries: Vec<String>,

    /// TLS configuration for private registries.
    pub tls: Option<TlsConfig>,

    /// User agent string.
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfig {
    /// Creates a configuration with default timeouts.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use bootproxy_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new();
    /// assert_eq!(config.request_timeout, Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            insecure_registries: Vec::new(),
            tls: None,
            user_agent: format!("bootproxy/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Marks a registry domain as plain HTTP.
    #[must_use]
    pub fn with_insecure_registry(mut self, domain: impl Into<String>) -> Self {
        self.insecure_registries.push(domain.into());
        self
    }

    /// Sets the TLS configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Returns the URL scheme used for `domain`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new().with_insecure_registry("localhost:5000");
    /// assert_eq!(config.scheme_for("localhost:5000"), "http");
    /// assert_eq!(config.scheme_for("ghcr.io"), "https");
    /// ```
    #[must_use]
    pub fn scheme_for(&self, domain: &str) -> &'static str {
        if self.insecure_registries.iter().any(|d| d == domain) {
            "http"
        } else {
            "https"
        }
    }
}

/// TLS configuration for registry connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Path to an additional CA certificate file.
    pub ca_cert: Option<PathBuf>,

    /// Whether to skip certificate verification (NOT recommended for production).
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Creates a new TLS configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ca_cert: None,
            insecure_skip_verify: false,
        }
    }

    /// Sets the CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Enables insecure mode (skips certificate verification).
    ///
    /// # Warning
    ///
    /// This should only be used for testing. Never use in production.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }
}
