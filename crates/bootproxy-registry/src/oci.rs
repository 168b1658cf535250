//! OCI Distribution Specification types.
//!
//! This module defines the manifest, index and descriptor documents the
//! resolver reads, plus the media types used by boot images.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Annotation carrying the file name of a layer.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

/// Per-layer architecture annotation used by Garden Linux images.
pub const ANNOTATION_LAYER_ARCHITECTURE: &str = "io.gardenlinux.image.layer.architecture";

/// Index entry annotation naming the boot image flavor.
pub const ANNOTATION_CNAME: &str = "cname";

/// Index entry annotation naming the architecture (legacy images).
pub const ANNOTATION_ARCHITECTURE: &str = "architecture";

/// A media type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    /// OCI image manifest media type.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index media type.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// Docker v2 schema 2 manifest media type.
    pub const DOCKER_MANIFEST: &'static str =
        "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker manifest list media type.
    pub const DOCKER_MANIFEST_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// Kernel layer.
    pub const KERNEL: &'static str = "application/io.gardenlinux.kernel";

    /// Kernel layer, legacy spelling.
    pub const KERNEL_LEGACY: &'static str = "application/vnd.ironcore.image.vmlinuz.v1alpha1.vmlinuz";

    /// Initial ramdisk layer.
    pub const INITRD: &'static str = "application/io.gardenlinux.initrd";

    /// Initial ramdisk layer, legacy spelling.
    pub const INITRD_LEGACY: &'static str =
        "application/vnd.ironcore.image.initramfs.v1alpha1.initramfs";

    /// Root filesystem squashfs layer.
    pub const SQUASHFS: &'static str = "application/io.gardenlinux.squashfs";

    /// Root filesystem squashfs layer, legacy spelling.
    pub const SQUASHFS_LEGACY: &'static str =
        "application/vnd.ironcore.image.squashfs.v1alpha1.squashfs";

    /// Unified kernel image layer.
    pub const UKI: &'static str = "application/vnd.ironcore.image.uki";

    /// Bootable ISO layer.
    pub const ISO: &'static str = "application/vnd.ironcore.image.iso";

    /// Content type firmware HTTPBoot clients expect for EFI binaries.
    pub const EFI: &'static str = "application/efi";

    /// Creates a new media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for image index and manifest list types.
    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self.0.as_str(), Self::OCI_INDEX | Self::DOCKER_MANIFEST_LIST)
    }

    /// Returns true for single-platform manifest types.
    #[must_use]
    pub fn is_manifest(&self) -> bool {
        matches!(self.0.as_str(), Self::OCI_MANIFEST | Self::DOCKER_MANIFEST)
    }

    /// The `Accept` header value for manifest requests.
    #[must_use]
    pub fn manifest_accept() -> String {
        [
            Self::OCI_INDEX,
            Self::OCI_MANIFEST,
            Self::DOCKER_MANIFEST_LIST,
            Self::DOCKER_MANIFEST,
        ]
        .join(", ")
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Target platform of an index entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture (e.g., "amd64", "arm64").
    pub architecture: String,

    /// Operating system (e.g., "linux").
    #[serde(default)]
    pub os: String,

    /// Optional CPU variant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// OCI content descriptor.
///
/// A descriptor describes the disposition of targeted content. It includes
/// the type of the content, a content identifier (digest), and the byte-size
/// of the raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: MediaType,

    /// Digest of the targeted content.
    pub digest: String,

    /// Size in bytes of the content.
    pub size: u64,

    /// Platform, set on index entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    /// Optional annotations (key-value metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Descriptor {
    /// Creates a new descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::{Descriptor, MediaType};
    ///
    /// let desc = Descriptor::new(MediaType::new(MediaType::UKI), "sha256:abc123", 1024);
    /// assert_eq!(desc.size, 1024);
    /// ```
    #[must_use]
    pub fn new(media_type: MediaType, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type,
            digest: digest.into(),
            size,
            platform: None,
            annotations: None,
        }
    }

    /// Adds an annotation to the descriptor.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Sets the platform architecture.
    #[must_use]
    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.platform = Some(Platform {
            architecture: architecture.into(),
            os: "linux".to_string(),
            variant: None,
        });
        self
    }

    /// Looks up an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Returns the platform architecture, if the descriptor has a platform.
    #[must_use]
    pub fn architecture(&self) -> Option<&str> {
        self.platform.as_ref().map(|p| p.architecture.as_str())
    }
}

/// OCI image manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this manifest, if embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Configuration descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    /// Layers that make up the image.
    #[serde(default)]
    pub layers: Vec<Descriptor>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Manifest {
    /// Creates a manifest with the given layers.
    #[must_use]
    pub fn new(layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::new(MediaType::OCI_MANIFEST)),
            config: None,
            layers,
            annotations: None,
        }
    }
}

/// OCI image index (or Docker manifest list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this index, if embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// One entry per platform or flavor.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl ImageIndex {
    /// Creates an index with the given entries.
    #[must_use]
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::new(MediaType::OCI_INDEX)),
            manifests,
            annotations: None,
        }
    }
}
