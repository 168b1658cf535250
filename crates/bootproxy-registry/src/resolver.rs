//! Boot artifact resolution.
//!
//! Turns an image reference into the layer descriptors of its boot
//! artifacts. Multi-architecture indexes are narrowed to one entry for the
//! target architecture; layers are then matched by media type, then by file
//! name, then (for single-layer images) by position.

use crate::client::RegistryClient;
use crate::error::RegistryError;
use crate::oci::{
    Descriptor, ImageIndex, Manifest, MediaType, ANNOTATION_ARCHITECTURE, ANNOTATION_CNAME,
    ANNOTATION_LAYER_ARCHITECTURE, ANNOTATION_TITLE,
};
use crate::reference::{Digest, ImageName, ImageReference};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use sha2::{Digest as _, Sha256};

/// Flavor prefix of PXE boot entries in legacy indexes.
pub const DEFAULT_LEGACY_FLAVOR_PREFIX: &str = "metal_pxe";

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// A kind of boot artifact stored as an image layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Linux kernel.
    Kernel,
    /// Initial ramdisk.
    Initrd,
    /// Root filesystem image.
    Squashfs,
    /// Unified kernel image.
    Uki,
    /// Bootable ISO.
    Iso,
}

impl ArtifactKind {
    /// Artifacts needed for a PXE boot.
    pub const PXE: [Self; 3] = [Self::Kernel, Self::Initrd, Self::Squashfs];

    /// Accepted layer media types, current spelling first.
    #[must_use]
    pub const fn media_types(self) -> &'static [&'static str] {
        match self {
            Self::Kernel => &[MediaType::KERNEL, MediaType::KERNEL_LEGACY],
            Self::Initrd => &[MediaType::INITRD, MediaType::INITRD_LEGACY],
            Self::Squashfs => &[MediaType::SQUASHFS, MediaType::SQUASHFS_LEGACY],
            Self::Uki => &[MediaType::UKI],
            Self::Iso => &[MediaType::ISO],
        }
    }

    /// File name suffix matched against the title annotation.
    #[must_use]
    pub const fn file_suffix(self) -> &'static str {
        match self {
            Self::Kernel => ".vmlinuz",
            Self::Initrd => ".initrd",
            Self::Squashfs => ".squashfs",
            Self::Uki => ".efi",
            Self::Iso => ".iso",
        }
    }

    /// Returns the kind whose media types include `media_type`.
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        [Self::Kernel, Self::Initrd, Self::Squashfs, Self::Uki, Self::Iso]
            .into_iter()
            .find(|kind| kind.media_types().contains(&media_type))
    }

    /// Returns a string representation for display.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Initrd => "initrd",
            Self::Squashfs => "squashfs",
            Self::Uki => "UKI",
            Self::Iso => "ISO",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layers assigned to each requested artifact kind.
#[derive(Debug, Clone, Default)]
pub struct ResolvedArtifacts {
    layers: Vec<(ArtifactKind, Descriptor)>,
}

impl ResolvedArtifacts {
    /// Returns the layer for `kind`.
    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> Option<&Descriptor> {
        self.layers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d)
    }

    /// Returns the layer digest for `kind`.
    #[must_use]
    pub fn digest(&self, kind: ArtifactKind) -> Option<&str> {
        self.get(kind).map(|d| d.digest.as_str())
    }

    /// Iterates over the assignments in request order.
    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &Descriptor)> {
        self.layers.iter().map(|(k, d)| (*k, d))
    }

    /// Removes and returns the layer for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::LayerNotFound`] if `kind` was not resolved.
    pub fn take(mut self, kind: ArtifactKind) -> Result<Descriptor, RegistryError> {
        let pos = self
            .layers
            .iter()
            .position(|(k, _)| *k == kind)
            .ok_or_else(|| RegistryError::LayerNotFound {
                kind: kind.to_string(),
            })?;
        Ok(self.layers.swap_remove(pos).1)
    }
}

/// Layer digests for a PXE boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PxeDigests {
    /// Kernel layer digest.
    pub kernel: String,
    /// Initrd layer digest.
    pub initrd: String,
    /// Squashfs layer digest.
    pub squashfs: String,
}

/// A parsed manifest document.
#[derive(Debug)]
enum Document {
    Index(ImageIndex),
    Manifest(Manifest),
}

/// Resolves image references to boot artifact layers.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: RegistryClient,
    legacy_flavor_prefix: String,
}

impl ManifestResolver {
    /// Creates a resolver using `client` for registry access.
    #[must_use]
    pub fn new(client: RegistryClient) -> Self {
        Self {
            client,
            legacy_flavor_prefix: DEFAULT_LEGACY_FLAVOR_PREFIX.to_string(),
        }
    }

    /// Sets the `cname` prefix matched by the legacy index selection pass.
    #[must_use]
    pub fn with_legacy_flavor_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.legacy_flavor_prefix = prefix.into();
        self
    }

    /// Returns the underlying registry client.
    #[must_use]
    pub const fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Resolves `reference` for `architecture` and assigns a layer to every
    /// kind in `kinds`.
    ///
    /// # Errors
    ///
    /// Fails if the registry cannot be reached or authenticated against, if
    /// no index entry matches `architecture`, if a fetched document does not
    /// match its descriptor, or if any requested kind has no layer.
    pub async fn resolve(
        &self,
        reference: &ImageReference,
        architecture: &str,
        kinds: &[ArtifactKind],
    ) -> Result<ResolvedArtifacts, RegistryError> {
        let image = reference.image();
        let info = self
            .client
            .registry_info(image.registry(), image.repository())
            .await?;
        let auth = self.client.authorization(&info, image.repository()).await?;
        self.resolve_with_auth(reference, architecture, kinds, auth.as_ref())
            .await
    }

    /// Like [`Self::resolve`], with an `Authorization` header the caller has
    /// already negotiated for the reference's repository.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub async fn resolve_with_auth(
        &self,
        reference: &ImageReference,
        architecture: &str,
        kinds: &[ArtifactKind],
        auth: Option<&HeaderValue>,
    ) -> Result<ResolvedArtifacts, RegistryError> {
        let image = reference.image();
        let (root, content) = self
            .resolve_descriptor(image, reference.manifest_reference(), reference.digest(), auth)
            .await?;
        let data = match content {
            Some(data) => data,
            None => self.fetch_content(image, &root, auth).await?,
        };

        let manifest = match parse_document(&root.media_type, &data)? {
            Document::Manifest(manifest) => manifest,
            Document::Index(index) => {
                let entry = select_index_entry(&index, architecture, &self.legacy_flavor_prefix)?;
                tracing::debug!(
                    reference = %reference,
                    architecture,
                    digest = %entry.digest,
                    "Selected index entry"
                );
                let nested = self.fetch_content(image, entry, auth).await?;
                match parse_document(&entry.media_type, &nested)? {
                    Document::Manifest(manifest) => manifest,
                    Document::Index(_) => {
                        return Err(RegistryError::UnsupportedMediaType {
                            media_type: entry.media_type.to_string(),
                        })
                    }
                }
            }
        };

        select_layers(&manifest, architecture, kinds)
    }

    /// Resolves the kernel, initrd and squashfs layers.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub async fn resolve_pxe(
        &self,
        reference: &ImageReference,
        architecture: &str,
    ) -> Result<PxeDigests, RegistryError> {
        let resolved = self
            .resolve(reference, architecture, &ArtifactKind::PXE)
            .await?;
        Ok(PxeDigests {
            kernel: resolved.clone().take(ArtifactKind::Kernel)?.digest,
            initrd: resolved.clone().take(ArtifactKind::Initrd)?.digest,
            squashfs: resolved.take(ArtifactKind::Squashfs)?.digest,
        })
    }

    /// Resolves a single artifact layer, such as the UKI or ISO.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub async fn resolve_single(
        &self,
        reference: &ImageReference,
        architecture: &str,
        kind: ArtifactKind,
    ) -> Result<Descriptor, RegistryError> {
        self.resolve(reference, architecture, &[kind])
            .await?
            .take(kind)
    }

    /// Builds the HTTPBoot URL of the UKI in `image`.
    ///
    /// The URL has the form `<server_url>/<name>/sha256-<hex>.efi`.
    ///
    /// # Errors
    ///
    /// Fails if `image` is not a valid reference, `server_url` is not an
    /// absolute URL, or the image has no UKI layer.
    pub async fn httpboot_uki_url(
        &self,
        image: &str,
        server_url: &str,
        architecture: &str,
    ) -> Result<String, RegistryError> {
        let reference = ImageReference::parse(image)?;
        let uki = self
            .resolve_single(&reference, architecture, ArtifactKind::Uki)
            .await?;
        let digest = Digest::parse(&uki.digest)?;
        url::Url::parse(server_url).map_err(|_| RegistryError::InvalidUrl {
            url: server_url.to_string(),
        })?;
        Ok(format!(
            "{}/{}/sha256-{}.efi",
            server_url.trim_end_matches('/'),
            reference.name(),
            digest.encoded()
        ))
    }

    /// Resolves a tag or digest to a descriptor.
    ///
    /// Tries `HEAD` first. Registries that reject `HEAD`, or omit the digest
    /// or length headers, are asked with `GET` and the descriptor is derived
    /// from the returned document, which is handed back to avoid a refetch.
    ///
    /// A `pinned` digest always becomes the descriptor's digest, so the
    /// document is checked against what the caller asked for rather than what
    /// the registry claims.
    async fn resolve_descriptor(
        &self,
        image: &ImageName,
        reference: &str,
        pinned: Option<&Digest>,
        auth: Option<&HeaderValue>,
    ) -> Result<(Descriptor, Option<Vec<u8>>), RegistryError> {
        let url = self.client.manifest_url(image, reference);

        let response = self
            .client
            .api_head(&url, auth)
            .header(ACCEPT, MediaType::manifest_accept())
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::ManifestNotFound {
                reference: format!("{image}:{reference}"),
            });
        } else if status.is_success() {
            if let Some(descriptor) = descriptor_from_headers(response.headers()) {
                if let Some(pinned) = pinned {
                    if descriptor.digest != pinned.as_str() {
                        return Err(RegistryError::DigestMismatch {
                            expected: pinned.to_string(),
                            actual: descriptor.digest,
                        });
                    }
                }
                return Ok((descriptor, None));
            }
        } else {
            tracing::debug!(
                image = %image,
                reference,
                status = status.as_u16(),
                "Manifest HEAD rejected, retrying with GET"
            );
        }

        let response = self
            .client
            .api_get(&url, auth)
            .header(ACCEPT, MediaType::manifest_accept())
            .send()
            .await?;
        check_manifest_status(response.status(), image, reference)?;
        let media_type = header_media_type(response.headers());
        let data = response.bytes().await?.to_vec();

        let media_type = media_type
            .or_else(|| embedded_media_type(&data))
            .unwrap_or_else(|| MediaType::new(MediaType::OCI_MANIFEST));
        let digest = pinned.map_or_else(|| compute_digest(&data), ToString::to_string);
        let descriptor = Descriptor::new(media_type, digest, data.len() as u64);
        verify_content(&descriptor, &data)?;
        Ok((descriptor, Some(data)))
    }

    /// Fetches the document behind `descriptor` and verifies its length and
    /// digest.
    async fn fetch_content(
        &self,
        image: &ImageName,
        descriptor: &Descriptor,
        auth: Option<&HeaderValue>,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = self.client.manifest_url(image, &descriptor.digest);

        let response = self
            .client
            .api_get(&url, auth)
            .header(ACCEPT, MediaType::manifest_accept())
            .send()
            .await?;
        check_manifest_status(response.status(), image, &descriptor.digest)?;

        let data = response.bytes().await?.to_vec();
        verify_content(descriptor, &data)?;
        Ok(data)
    }
}

fn check_manifest_status(
    status: StatusCode,
    image: &ImageName,
    reference: &str,
) -> Result<(), RegistryError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(RegistryError::ManifestNotFound {
            reference: format!("{image}:{reference}"),
        })
    } else {
        Err(RegistryError::HttpError {
            status: status.as_u16(),
            message: format!("fetching manifest {image}:{reference}"),
        })
    }
}

fn header_media_type(headers: &HeaderMap) -> Option<MediaType> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media_type = value.split(';').next()?.trim();
    (!media_type.is_empty()).then(|| MediaType::new(media_type))
}

fn descriptor_from_headers(headers: &HeaderMap) -> Option<Descriptor> {
    let media_type = header_media_type(headers)?;
    let digest = headers.get(DOCKER_CONTENT_DIGEST)?.to_str().ok()?;
    let size = headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()?;
    Digest::parse(digest).ok()?;
    Some(Descriptor::new(media_type, digest, size))
}

fn embedded_media_type(data: &[u8]) -> Option<MediaType> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    value
        .get("mediaType")
        .and_then(serde_json::Value::as_str)
        .map(MediaType::new)
}

/// Parses `data` as an index or manifest according to `media_type`,
/// sniffing the document shape when the media type is not conclusive.
fn parse_document(media_type: &MediaType, data: &[u8]) -> Result<Document, RegistryError> {
    if media_type.is_index() {
        return Ok(Document::Index(serde_json::from_slice(data)?));
    }
    if media_type.is_manifest() {
        return Ok(Document::Manifest(serde_json::from_slice(data)?));
    }

    let value: serde_json::Value = serde_json::from_slice(data)?;
    if value.get("manifests").is_some() {
        Ok(Document::Index(serde_json::from_value(value)?))
    } else if value.get("layers").is_some() {
        Ok(Document::Manifest(serde_json::from_value(value)?))
    } else {
        Err(RegistryError::UnsupportedMediaType {
            media_type: media_type.to_string(),
        })
    }
}

/// Checks fetched bytes against the descriptor's size and, for sha256
/// digests, content hash.
pub(crate) fn verify_content(descriptor: &Descriptor, data: &[u8]) -> Result<(), RegistryError> {
    let actual = data.len() as u64;
    if actual != descriptor.size {
        return Err(RegistryError::SizeMismatch {
            expected: descriptor.size,
            actual,
        });
    }

    if descriptor.digest.starts_with("sha256:") {
        let computed = compute_digest(data);
        if computed != descriptor.digest {
            return Err(RegistryError::DigestMismatch {
                expected: descriptor.digest.clone(),
                actual: computed,
            });
        }
    }

    Ok(())
}

/// Computes SHA-256 digest of data.
fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Picks the index entry for `architecture`.
///
/// Legacy entries (a `cname` starting with `legacy_prefix` plus an
/// `architecture` annotation) are preferred over structured platform
/// matches. The first match in each pass wins.
fn select_index_entry<'a>(
    index: &'a ImageIndex,
    architecture: &str,
    legacy_prefix: &str,
) -> Result<&'a Descriptor, RegistryError> {
    let legacy = index.manifests.iter().find(|entry| {
        entry
            .annotation(ANNOTATION_CNAME)
            .is_some_and(|cname| cname.starts_with(legacy_prefix))
            && entry.annotation(ANNOTATION_ARCHITECTURE) == Some(architecture)
    });

    legacy
        .or_else(|| {
            index
                .manifests
                .iter()
                .find(|entry| entry.architecture() == Some(architecture))
        })
        .ok_or_else(|| RegistryError::ArchitectureNotFound {
            architecture: architecture.to_string(),
        })
}

/// Assigns a layer to each kind in `kinds`.
///
/// Layers annotated for a different architecture are ignored.
fn select_layers(
    manifest: &Manifest,
    architecture: &str,
    kinds: &[ArtifactKind],
) -> Result<ResolvedArtifacts, RegistryError> {
    let candidates: Vec<&Descriptor> = manifest
        .layers
        .iter()
        .filter(|layer| {
            layer
                .annotation(ANNOTATION_LAYER_ARCHITECTURE)
                .map_or(true, |arch| arch == architecture)
        })
        .collect();

    let mut resolved = ResolvedArtifacts::default();
    for &kind in kinds {
        let by_media_type = candidates
            .iter()
            .find(|layer| kind.media_types().contains(&layer.media_type.as_str()));
        let by_title = || {
            candidates.iter().find(|layer| {
                layer
                    .annotation(ANNOTATION_TITLE)
                    .is_some_and(|title| title.ends_with(kind.file_suffix()))
            })
        };
        let only_layer = || {
            (manifest.layers.len() == 1)
                .then(|| candidates.first())
                .flatten()
        };

        let layer = by_media_type
            .or_else(by_title)
            .or_else(only_layer)
            .ok_or_else(|| RegistryError::LayerNotFound {
                kind: kind.to_string(),
            })?;
        resolved.layers.push((kind, (*layer).clone()));
    }

    Ok(resolved)
}
