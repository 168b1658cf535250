//! Bootproxy Server
//!
//! HTTP server that lets network-boot clients download OS image layers
//! straight from OCI registries.
//!
//! # Overview
//!
//! Boot firmware and early boot agents fetch kernels, initrds, root
//! filesystems and unified kernel images with plain unauthenticated `GET`
//! requests. The server:
//! - **Gates registries**: an allow-list or block-list decides which
//!   registries may be proxied; with neither configured, all are denied
//! - **Negotiates auth**: anonymous and bearer-token registries are
//!   supported, with detection cached per registry
//! - **Streams blobs**: layers are proxied without buffering, following the
//!   registry's storage redirect and fixing up headers for firmware clients
//! - **Serves config drives**: per-machine provisioning images, cached with
//!   a TTL and a size bound
//!
//! # Architecture
//!
//! ```text
//!   ┌─────────────┐  GET /image, /httpboot/...   ┌─────────────────────┐
//!   │ Boot client │ ───────────────────────────▶ │    ProxyServer      │
//!   └─────────────┘                              │ policy → auth →     │
//!                                                │ resolve → BlobProxy │
//!                                                └──────────┬──────────┘
//!                                                           │ OCI distribution
//!                                                           ▼
//!                                                ┌─────────────────────┐
//!                                                │    OCI registry     │
//!                                                └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bootproxy_registry::{RegistryCache, RegistryClient, RegistryConfig, RegistryPolicy};
//! use bootproxy_server::{AppState, NoConfigDrives, ProxyServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let client = RegistryClient::new(RegistryConfig::new(), Arc::new(RegistryCache::new()))?;
//!     let state = AppState::new(client, RegistryPolicy::from_env(), &config, Arc::new(NoConfigDrives));
//!
//!     ProxyServer::new(config, state).run_until_shutdown().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]

pub mod cache;
pub mod config;
pub mod error;
pub mod provider;
pub mod proxy;
pub mod server;

// Re-export main types at crate root
pub use cache::{ConfigDriveCache, SweeperHandle};
pub use config::ServerConfig;
pub use error::{ProxyError, Result};
pub use provider::{ConfigDriveProvider, DirectoryConfigDrives, NoConfigDrives, StaticConfigDrives};
pub use proxy::{BlobProxy, MAX_REDIRECT_HOPS};
pub use server::{router, AppState, ProxyServer, ServerError, ServerHandle};
