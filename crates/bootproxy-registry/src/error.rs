//! Error types for registry operations.

use thiserror::Error;

/// Errors that can occur while talking to an OCI registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed image reference.
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference {
        /// Reference string as supplied.
        reference: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Malformed content digest.
    #[error("invalid digest {digest:?}")]
    InvalidDigest {
        /// Digest string as supplied.
        digest: String,
    },

    /// Registry is not admitted by the configured policy.
    #[error("registry {registry} is not allowed")]
    RegistryNotAllowed {
        /// Registry domain.
        registry: String,
    },

    /// Failed to connect to registry.
    #[error("registry unreachable at {url}: {source}")]
    ConnectionFailed {
        /// Request URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The `/v2/` probe answered with a status other than 200 or 401.
    #[error("unexpected status {status} probing {url}")]
    UnexpectedProbeStatus {
        /// Probe URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The registry answered 401 without a usable challenge.
    #[error("401 without WWW-Authenticate header from {registry}")]
    MissingChallenge {
        /// Registry domain.
        registry: String,
    },

    /// The challenge names an auth scheme this client does not speak.
    #[error("unsupported auth: {challenge}")]
    UnsupportedAuth {
        /// Raw `WWW-Authenticate` value.
        challenge: String,
    },

    /// The registry requires an auth flow that is not implemented.
    #[error("{feature} not implemented")]
    NotImplemented {
        /// Missing feature.
        feature: &'static str,
    },

    /// Authentication failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// HTTP error from registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Manifest or index could not be found.
    #[error("manifest not found: {reference}")]
    ManifestNotFound {
        /// Reference that was looked up.
        reference: String,
    },

    /// A manifest was served with a media type this client cannot interpret.
    #[error("unsupported manifest media type {media_type:?}")]
    UnsupportedMediaType {
        /// Offending media type.
        media_type: String,
    },

    /// No index entry matches the requested architecture.
    #[error("target manifest not found for architecture {architecture}")]
    ArchitectureNotFound {
        /// Requested architecture.
        architecture: String,
    },

    /// A required boot artifact layer is missing from the manifest.
    #[error("{kind} layer not found in image")]
    LayerNotFound {
        /// Artifact kind.
        kind: String,
    },

    /// Fetched content length differs from the descriptor.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Declared size.
        expected: u64,
        /// Received size.
        actual: u64,
    },

    /// Fetched content hash differs from the descriptor.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Declared digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// The client could not be built from its configuration.
    #[error("invalid registry client configuration: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },
}

impl RegistryError {
    pub(crate) fn invalid_reference(reference: &str, reason: &'static str) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason,
        }
    }

    /// Returns true for errors caused by malformed caller input.
    #[must_use]
    pub const fn is_reference_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidReference { .. } | Self::InvalidDigest { .. }
        )
    }

    /// Returns true for errors that are deterministic for a given image, such as
    /// a missing architecture or layer.
    #[must_use]
    pub const fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::ManifestNotFound { .. }
                | Self::UnsupportedMediaType { .. }
                | Self::ArchitectureNotFound { .. }
                | Self::LayerNotFound { .. }
        )
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else if err.is_status() {
            let status = err.status().map_or(0, |s| s.as_u16());
            Self::HttpError {
                status,
                message: err.to_string(),
            }
        } else {
            Self::HttpError {
                status: 0,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_size_mismatch() {
        let err = RegistryError::SizeMismatch {
            expected: 10,
            actual: 7,
        };
        assert_eq!(err.to_string(), "size mismatch: expected 10, got 7");
    }

    #[test]
    fn test_error_display_architecture() {
        let err = RegistryError::ArchitectureNotFound {
            architecture: "ppc64le".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "target manifest not found for architecture ppc64le"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(RegistryError::invalid_reference("repo", "missing tag").is_reference_error());
        assert!(RegistryError::LayerNotFound {
            kind: "kernel".to_string()
        }
        .is_resolution_error());
        assert!(!RegistryError::AuthenticationFailed {
            message: "nope".to_string()
        }
        .is_resolution_error());
    }
}
