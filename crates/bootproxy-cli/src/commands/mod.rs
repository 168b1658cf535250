//! CLI commands and argument parsing.

pub mod resolve;
pub mod serve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bootproxy_registry::{RegistryCache, RegistryClient, RegistryConfig, TlsConfig};
use clap::{Args, Parser, Subcommand};

/// Bootproxy - network boot images straight from OCI registries
#[derive(Parser)]
#[command(name = "bootproxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the image proxy server
    Serve(serve::ServeArgs),

    /// Resolve the boot layers of an image
    Resolve(resolve::ResolveArgs),

    /// Print version information
    Version,
}

/// Registry client options shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Registries contacted over plain HTTP (comma-separated)
    #[arg(
        long = "insecure-registry",
        env = "BOOTPROXY_INSECURE_REGISTRIES",
        value_delimiter = ','
    )]
    pub insecure_registries: Vec<String>,

    /// Timeout in seconds for registry API requests
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// CA certificate for registry TLS
    #[arg(long, env = "BOOTPROXY_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS certificate verification (insecure)
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,
}

impl RegistryArgs {
    /// Builds the registry client configuration.
    pub fn config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::new().with_timeout(Duration::from_secs(self.timeout));
        for registry in self.insecure_registries.iter().map(|r| r.trim()) {
            if !registry.is_empty() {
                config = config.with_insecure_registry(registry);
            }
        }

        if self.ca_cert.is_some() || self.insecure_skip_tls_verify {
            let mut tls = TlsConfig::new();
            if let Some(ref ca_cert) = self.ca_cert {
                tls = tls.with_ca_cert(ca_cert);
            }
            if self.insecure_skip_tls_verify {
                tls = tls.insecure();
            }
            config = config.with_tls(tls);
        }

        config
    }

    /// Builds a registry client with a fresh auth cache.
    pub fn client(&self) -> Result<RegistryClient> {
        RegistryClient::new(self.config(), Arc::new(RegistryCache::new()))
            .context("Failed to create registry client")
    }
}
