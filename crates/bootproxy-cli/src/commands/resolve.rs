//! Resolve command implementation.
//!
//! Prints the layer digests a boot client would be served for an image.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use bootproxy_registry::{ArtifactKind, ImageReference, ManifestResolver};
use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::info;

use super::RegistryArgs;

/// What kind of boot image to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// Kernel, initrd and squashfs
    Pxe,
    /// Unified kernel image
    Uki,
    /// Bootable ISO
    Iso,
}

impl Kind {
    fn artifacts(self) -> &'static [ArtifactKind] {
        match self {
            Self::Pxe => &ArtifactKind::PXE,
            Self::Uki => &[ArtifactKind::Uki],
            Self::Iso => &[ArtifactKind::Iso],
        }
    }
}

/// Arguments for the resolve command.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Image reference (e.g., `ghcr.io/org/os:1.0`)
    pub image: String,

    /// Target architecture
    #[arg(short, long, default_value = "amd64")]
    pub architecture: String,

    /// Boot image kind
    #[arg(short, long, value_enum, default_value = "pxe")]
    pub kind: Kind,

    /// Image proxy base URL; prints the HTTPBoot URL of the UKI
    #[arg(long)]
    pub httpboot_url: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    reference: String,
    architecture: String,
    layers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    httpboot_url: Option<String>,
}

/// Runs the resolve command.
///
/// # Errors
///
/// Returns an error if the reference is invalid or resolution fails.
pub async fn execute(args: &ResolveArgs) -> Result<()> {
    let reference = ImageReference::parse(&args.image).context("Invalid image reference")?;
    let resolver = ManifestResolver::new(args.registry.client()?);

    info!(
        reference = %reference,
        architecture = %args.architecture,
        kind = ?args.kind,
        "Resolving image"
    );

    let resolved = resolver
        .resolve(&reference, &args.architecture, args.kind.artifacts())
        .await
        .with_context(|| format!("Failed to resolve {reference}"))?;

    let layers: BTreeMap<String, String> = resolved
        .iter()
        .map(|(kind, layer)| (kind.to_string(), layer.digest.clone()))
        .collect();

    let httpboot_url = match args.httpboot_url {
        Some(ref server_url) => Some(
            resolver
                .httpboot_uki_url(&args.image, server_url, &args.architecture)
                .await
                .context("Failed to build HTTPBoot URL")?,
        ),
        None => None,
    };

    let output = ResolveOutput {
        reference: reference.to_string(),
        architecture: args.architecture.clone(),
        layers,
        httpboot_url,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Image:        {}", output.reference);
        println!("Architecture: {}", output.architecture);
        for (kind, digest) in &output.layers {
            println!("  {kind:<10} {digest}");
        }
        if let Some(ref url) = output.httpboot_url {
            println!("HTTPBoot URL: {url}");
        }
    }

    Ok(())
}
