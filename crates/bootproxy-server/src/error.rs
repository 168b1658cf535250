//! Error types for the proxy server.
//!
//! Handlers return [`ProxyError`]; its [`IntoResponse`] impl is the single
//! place where failures become HTTP status codes. Response bodies are short
//! fixed strings so nothing about the upstream registry leaks to boot clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bootproxy_registry::RegistryError;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while serving a boot request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Request is missing parameters or has a malformed path.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request.
        reason: String,
    },

    /// Registry protocol or resolution failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The upstream blob request failed.
    #[error("upstream request to {url} failed: {source}")]
    Upstream {
        /// Upstream URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The upstream redirect had no usable `Location`.
    #[error("invalid redirect from {url}")]
    InvalidRedirect {
        /// URL that answered with the redirect.
        url: String,
    },

    /// No config drive exists for the machine.
    #[error("config drive '{id}' not found")]
    ConfigDriveNotFound {
        /// Config drive identifier.
        id: String,
    },

    /// Rendering a config drive failed.
    #[error("config drive '{id}' could not be rendered: {reason}")]
    ConfigDrive {
        /// Config drive identifier.
        id: String,
        /// Failure reason.
        reason: String,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns the status code and body sent to the client.
    #[must_use]
    pub fn status(&self) -> (StatusCode, &'static str) {
        const NOT_FOUND: (StatusCode, &str) = (StatusCode::NOT_FOUND, "Resource Not Found");
        const BAD_GATEWAY: (StatusCode, &str) = (StatusCode::BAD_GATEWAY, "Bad Gateway");
        const INTERNAL: (StatusCode, &str) =
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");

        match self {
            Self::InvalidRequest { .. } | Self::ConfigDriveNotFound { .. } => NOT_FOUND,
            Self::Upstream { .. } | Self::InvalidRedirect { .. } => BAD_GATEWAY,
            Self::ConfigDrive { .. } | Self::Internal(_) => INTERNAL,
            Self::Registry(err) => match err {
                RegistryError::InvalidReference { .. }
                | RegistryError::InvalidDigest { .. }
                | RegistryError::ManifestNotFound { .. }
                | RegistryError::UnsupportedMediaType { .. }
                | RegistryError::ArchitectureNotFound { .. }
                | RegistryError::LayerNotFound { .. }
                | RegistryError::SizeMismatch { .. }
                | RegistryError::DigestMismatch { .. }
                | RegistryError::JsonError { .. } => NOT_FOUND,
                RegistryError::RegistryNotAllowed { .. } => {
                    (StatusCode::FORBIDDEN, "Forbidden: Registry not allowed")
                }
                RegistryError::ConnectionFailed { .. }
                | RegistryError::UnexpectedProbeStatus { .. }
                | RegistryError::MissingChallenge { .. }
                | RegistryError::UnsupportedAuth { .. } => {
                    (StatusCode::BAD_GATEWAY, "Registry detection failed")
                }
                RegistryError::NotImplemented { .. } => {
                    (StatusCode::NOT_IMPLEMENTED, "Basic auth not yet implemented")
                }
                RegistryError::AuthenticationFailed { .. } => {
                    (StatusCode::UNAUTHORIZED, "Authentication failed")
                }
                RegistryError::HttpError { .. } => BAD_GATEWAY,
                RegistryError::InvalidUrl { .. } | RegistryError::Configuration { .. } => INTERNAL,
            },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_is_not_found() {
        let err = ProxyError::invalid_request("missing imageName");
        assert_eq!(err.status(), (StatusCode::NOT_FOUND, "Resource Not Found"));
        assert!(err.to_string().contains("missing imageName"));
    }

    #[test]
    fn test_registry_error_statuses() {
        let forbidden = ProxyError::from(RegistryError::RegistryNotAllowed {
            registry: "evil.example.com".to_string(),
        });
        assert_eq!(forbidden.status().0, StatusCode::FORBIDDEN);

        let basic = ProxyError::from(RegistryError::NotImplemented {
            feature: "basic auth",
        });
        assert_eq!(
            basic.status(),
            (StatusCode::NOT_IMPLEMENTED, "Basic auth not yet implemented")
        );

        let auth = ProxyError::from(RegistryError::AuthenticationFailed {
            message: "token endpoint returned 500".to_string(),
        });
        assert_eq!(auth.status().0, StatusCode::UNAUTHORIZED);

        let detection = ProxyError::from(RegistryError::MissingChallenge {
            registry: "r.example.com".to_string(),
        });
        assert_eq!(
            detection.status(),
            (StatusCode::BAD_GATEWAY, "Registry detection failed")
        );

        let arch = ProxyError::from(RegistryError::ArchitectureNotFound {
            architecture: "ppc64le".to_string(),
        });
        assert_eq!(arch.status().0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_body_hides_detail() {
        let err = ProxyError::from(RegistryError::SizeMismatch {
            expected: 10,
            actual: 7,
        });
        assert_eq!(err.status().1, "Resource Not Found");

        let err = ProxyError::ConfigDrive {
            id: "m1".to_string(),
            reason: "template error at line 3".to_string(),
        };
        assert_eq!(err.status().1, "Internal Server Error");
    }
}
