//! Image reference parsing.
//!
//! Handles the forms boot configurations use:
//! - `ghcr.io/org/os:1.0`
//! - `myregistry:5000/repo/image:v1.0`
//! - `repo/image@sha256:...`
//! - `repo/image:v1.0@sha256:...`
//!
//! A `:` only separates a tag when it appears after the last `/`, so a
//! registry port is never mistaken for a tag.

use crate::error::RegistryError;

/// Registry used when the first path segment does not look like a host.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Returns the index of the tag separator in `reference`, if any.
///
/// Only the last `:` after the last `/` counts.
#[must_use]
pub fn tag_separator_index(reference: &str) -> Option<usize> {
    let colon = reference.rfind(':')?;
    match reference.rfind('/') {
        Some(slash) if slash > colon => None,
        _ => Some(colon),
    }
}

/// A content digest such as `sha256:4f3a...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parses an `algorithm:encoded` digest.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDigest`] if either half is empty or
    /// contains characters outside the OCI digest grammar.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::Digest;
    ///
    /// let digest = Digest::parse("sha256:deadbeef").unwrap();
    /// assert_eq!(digest.algorithm(), "sha256");
    /// assert_eq!(digest.encoded(), "deadbeef");
    /// assert!(Digest::parse("sha256:").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidDigest {
            digest: input.to_string(),
        };

        let (algorithm, encoded) = input.split_once(':').ok_or_else(invalid)?;
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'+' | b'.' | b'_' | b'-'));
        let encoded_ok = !encoded.is_empty()
            && encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'));

        if algorithm_ok && encoded_ok {
            Ok(Self(input.to_string()))
        } else {
            Err(invalid())
        }
    }

    /// Parses the path-safe `sha256-<hex>` spelling used in HTTPBoot URLs.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDigest`] if the segment does not start
    /// with `sha256-` or the remainder is not a valid encoded digest.
    pub fn from_path_segment(segment: &str) -> Result<Self, RegistryError> {
        let encoded = segment
            .strip_prefix("sha256-")
            .ok_or_else(|| RegistryError::InvalidDigest {
                digest: segment.to_string(),
            })?;
        Self::parse(&format!("sha256:{encoded}"))
    }

    /// Returns the digest algorithm (e.g., "sha256").
    #[must_use]
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map_or("", |(a, _)| a)
    }

    /// Returns the digest value without the algorithm prefix.
    #[must_use]
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, e)| e)
    }

    /// Returns the full digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image name split into registry domain and repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    registry: String,
    repository: String,
}

impl ImageName {
    /// Splits an image name without tag or digest.
    ///
    /// The first path segment is the registry if it contains `.` or `:`;
    /// otherwise the name lives on [`DEFAULT_REGISTRY`] and single-segment
    /// names get the implicit `library/` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository path is empty or contains empty,
    /// `.` or `..` segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::ImageName;
    ///
    /// let name = ImageName::parse("ghcr.io/org/os").unwrap();
    /// assert_eq!(name.registry(), "ghcr.io");
    /// assert_eq!(name.repository(), "org/os");
    /// ```
    pub fn parse(name: &str) -> Result<Self, RegistryError> {
        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') => {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{name}")),
        };

        if name.is_empty() || repository.is_empty() {
            return Err(RegistryError::invalid_reference(name, "empty repository"));
        }
        if repository
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(RegistryError::invalid_reference(
                name,
                "invalid repository path segment",
            ));
        }

        Ok(Self {
            registry,
            repository,
        })
    }

    /// Returns the registry domain, including any port.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Returns the repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

/// A resolvable image reference: a name plus a tag, a digest, or both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    name: String,
    image: ImageName,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl ImageReference {
    /// Parses `name:tag`, `name@digest` or `name:tag@digest`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidReference`] when neither a tag nor a
    /// digest is present, when either is empty, or when the name is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::ImageReference;
    ///
    /// let reference = ImageReference::parse("myregistry:5000/repo/image:v1.0").unwrap();
    /// assert_eq!(reference.name(), "myregistry:5000/repo/image");
    /// assert_eq!(reference.tag(), Some("v1.0"));
    /// assert!(ImageReference::parse("repo/image").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let input = input.trim();

        let (name, tag, digest) = if let Some((base, digest)) = input.split_once('@') {
            if base.is_empty() || digest.is_empty() {
                return Err(RegistryError::invalid_reference(
                    input,
                    "empty name or digest",
                ));
            }
            let digest = Digest::parse(digest)
                .map_err(|_| RegistryError::invalid_reference(input, "invalid digest"))?;
            match tag_separator_index(base) {
                Some(sep) => {
                    let tag = &base[sep + 1..];
                    (&base[..sep], (!tag.is_empty()).then_some(tag), Some(digest))
                }
                None => (base, None, Some(digest)),
            }
        } else {
            let sep = tag_separator_index(input).ok_or_else(|| {
                RegistryError::invalid_reference(input, "expected name:tag or name@digest")
            })?;
            let (name, tag) = (&input[..sep], &input[sep + 1..]);
            if tag.is_empty() {
                return Err(RegistryError::invalid_reference(input, "empty tag"));
            }
            (name, Some(tag), None)
        };

        if name.is_empty() {
            return Err(RegistryError::invalid_reference(input, "empty repository"));
        }
        let image = ImageName::parse(name)?;

        Ok(Self {
            name: name.to_string(),
            image,
            tag: tag.map(ToString::to_string),
            digest,
        })
    }

    /// Builds a reference from an image name and a tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or tag is invalid.
    pub fn with_tag(name: &str, tag: &str) -> Result<Self, RegistryError> {
        Self::parse(&format!("{name}:{tag}"))
    }

    /// Returns the name as written, without tag or digest.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name split into registry and repository.
    #[must_use]
    pub const fn image(&self) -> &ImageName {
        &self.image
    }

    /// Returns the registry domain.
    #[must_use]
    pub fn registry(&self) -> &str {
        self.image.registry()
    }

    /// Returns the repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        self.image.repository()
    }

    /// Returns the tag, if present.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the digest, if present.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Returns what a manifest request should ask for: the digest when one is
    /// pinned, otherwise the tag.
    #[must_use]
    pub fn manifest_reference(&self) -> &str {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.as_str(),
            (None, Some(tag)) => tag,
            (None, None) => "latest",
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
