//! # Bootproxy Registry
//!
//! OCI distribution client for locating boot artifacts in container
//! registries.
//!
//! Operating system images for network boot are published as OCI images
//! whose layers are a kernel, an initrd and a squashfs root (PXE), or a
//! single unified kernel image (UKI) or ISO. This crate turns an image
//! reference into the digests of those layers.
//!
//! ## Features
//!
//! - **Reference parsing**: `registry/repo:tag` and `registry/repo@digest`
//! - **Auth discovery**: `/v2/` probing with anonymous and bearer token flows,
//!   cached per registry domain
//! - **Multi-arch resolution**: index entry selection by architecture,
//!   including legacy annotation-based indexes
//! - **Verified fetches**: manifest size and sha256 digest checks
//! - **Registry policy**: allow-list or block-list of registry domains
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bootproxy_registry::{
//!     ImageReference, ManifestResolver, RegistryCache, RegistryClient, RegistryConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RegistryClient::new(RegistryConfig::new(), Arc::new(RegistryCache::new()))?;
//!     let resolver = ManifestResolver::new(client);
//!
//!     let reference = ImageReference::parse("ghcr.io/gardenlinux/gardenlinux:1877.0")?;
//!     let pxe = resolver.resolve_pxe(&reference, "amd64").await?;
//!     println!("kernel: {}", pxe.kernel);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ManifestResolver                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Index entry │  │   Verify    │  │   Layer selection   │  │
//! │  │  selection  │  │ size/digest │  │ (type/title/single) │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RegistryClient                           │
//! │        (HTTP, auth detection, RegistryCache, tokens)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod auth;
mod client;
mod config;
mod error;
mod oci;
mod policy;
mod reference;
mod resolver;


pub use auth::{token_url, AuthMethod, Challenge, RegistryCache, RegistryInfo};
pub use client::RegistryClient;
pub use config::{RegistryConfig, TlsConfig};
pub use error::RegistryError;
pub use oci::{
    Descriptor, ImageIndex, Manifest, MediaType, Platform, ANNOTATION_ARCHITECTURE,
    ANNOTATION_CNAME, ANNOTATION_LAYER_ARCHITECTURE, ANNOTATION_TITLE,
};
pub use policy::{RegistryPolicy, ALLOWED_REGISTRIES_ENV, BLOCKED_REGISTRIES_ENV};
pub use reference::{Digest, ImageName, ImageReference, DEFAULT_REGISTRY};
pub use resolver::{
    ArtifactKind, ManifestResolver, PxeDigests, ResolvedArtifacts, DEFAULT_LEGACY_FLAVOR_PREFIX,
};
