//! Serve command implementation.
//!
//! Runs the image proxy until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bootproxy_registry::RegistryPolicy;
use bootproxy_server::{
    AppState, ConfigDriveProvider, DirectoryConfigDrives, NoConfigDrives, ProxyServer,
    ServerConfig,
};
use clap::Args;
use tracing::{info, warn};

use super::RegistryArgs;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "BOOTPROXY_BIND_ADDRESS", default_value = "0.0.0.0:8083")]
    pub bind: SocketAddr,

    /// Architecture images are resolved for
    #[arg(long, env = "BOOTPROXY_ARCHITECTURE", default_value = "amd64")]
    pub architecture: String,

    /// Registries that may be proxied (comma-separated, takes precedence)
    #[arg(long, env = "ALLOWED_REGISTRIES")]
    pub allowed_registries: Option<String>,

    /// Registries that may not be proxied (comma-separated)
    #[arg(long, env = "BLOCKED_REGISTRIES")]
    pub blocked_registries: Option<String>,

    /// Directory of pre-built `<id>.iso` config drives
    #[arg(long, env = "BOOTPROXY_CONFIG_DRIVE_DIR")]
    pub config_drive_dir: Option<PathBuf>,

    /// Config-drive cache TTL in seconds
    #[arg(long, default_value = "300")]
    pub config_drive_ttl: u64,

    /// Config-drive cache size limit in bytes
    #[arg(long, default_value = "104857600")]
    pub config_drive_max_size: usize,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Runs the serve command.
///
/// # Errors
///
/// Returns an error if the registry client cannot be built or the listen
/// address cannot be bound.
pub async fn execute(args: ServeArgs) -> Result<()> {
    let policy = RegistryPolicy::from_lists(
        args.allowed_registries.as_deref().unwrap_or_default(),
        args.blocked_registries.as_deref().unwrap_or_default(),
    );
    if policy.mode() == "deny-all" {
        warn!("No registry allow-list or block-list configured, all registries are denied");
    }

    let provider: Arc<dyn ConfigDriveProvider> = match args.config_drive_dir {
        Some(ref dir) => Arc::new(DirectoryConfigDrives::new(dir)),
        None => Arc::new(NoConfigDrives),
    };

    let config = ServerConfig::new(args.bind)
        .with_architecture(args.architecture.clone())
        .with_config_drive_ttl(Duration::from_secs(args.config_drive_ttl))
        .with_config_drive_max_size(args.config_drive_max_size);

    info!(
        bind = %config.bind_address,
        architecture = %config.architecture,
        policy = policy.mode(),
        "Starting bootproxy"
    );

    let client = args.registry.client()?;
    let state = AppState::new(client, policy, &config, provider);

    ProxyServer::new(config, state)
        .run_until_shutdown()
        .await
        .context("Image proxy server failed")
}
