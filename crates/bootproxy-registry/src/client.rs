//! OCI Distribution API client.
//!
//! This module provides the HTTP plumbing shared by the resolver and the
//! blob proxy: URL construction, auth detection with a per-domain cache,
//! and bearer token exchange.

use crate::auth::{AuthMethod, Challenge, RegistryCache, RegistryInfo, TokenResponse};
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::reference::{Digest, ImageName};
use reqwest::header::{HeaderValue, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use std::sync::Arc;

/// Client for interacting with OCI-compatible registries.
///
/// Cloning is cheap; clones share the HTTP connection pools and the
/// registry auth cache.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: Arc<RegistryConfig>,
    api: reqwest::Client,
    passthrough: reqwest::Client,
    cache: Arc<RegistryCache>,
}

impl RegistryClient {
    /// Creates a new registry client.
    ///
    /// `cache` is owned by the caller so that several clients, or a client
    /// and its tests, can share detection results.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use bootproxy_registry::{RegistryCache, RegistryClient, RegistryConfig};
    ///
    /// let client = RegistryClient::new(RegistryConfig::new(), Arc::new(RegistryCache::new()))?;
    /// # Ok::<(), bootproxy_registry::RegistryError>(())
    /// ```
    pub fn new(config: RegistryConfig, cache: Arc<RegistryCache>) -> Result<Self, RegistryError> {
        let api = Self::build_http_client(&config, reqwest::redirect::Policy::limited(10))?;
        let passthrough = Self::build_http_client(&config, reqwest::redirect::Policy::none())?;

        Ok(Self {
            config: Arc::new(config),
            api,
            passthrough,
            cache,
        })
    }

    /// Returns the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the shared registry auth cache.
    #[must_use]
    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    /// Returns the HTTP client that never follows redirects, for callers that
    /// handle redirects themselves.
    #[must_use]
    pub const fn passthrough_http(&self) -> &reqwest::Client {
        &self.passthrough
    }

    /// Returns `scheme://domain` for a registry.
    #[must_use]
    pub fn base_url(&self, domain: &str) -> String {
        format!("{}://{domain}", self.config.scheme_for(domain))
    }

    /// Returns the blob URL for `digest` in `image`'s repository.
    #[must_use]
    pub fn blob_url(&self, image: &ImageName, digest: &Digest) -> String {
        format!(
            "{}/v2/{}/blobs/{digest}",
            self.base_url(image.registry()),
            image.repository()
        )
    }

    /// Returns the manifest URL for `reference` (tag or digest) in `image`'s repository.
    #[must_use]
    pub fn manifest_url(&self, image: &ImageName, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{reference}",
            self.base_url(image.registry()),
            image.repository()
        )
    }

    /// Probes `GET /v2/` to classify the registry's auth requirement.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unreachable, answers with an
    /// unexpected status, or sends an unusable challenge.
    pub async fn detect(
        &self,
        domain: &str,
        repository: &str,
    ) -> Result<RegistryInfo, RegistryError> {
        let url = format!("{}/v2/", self.base_url(domain));

        let response = self
            .api
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|source| RegistryError::ConnectionFailed {
                url: url.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(RegistryInfo::anonymous(domain)),
            StatusCode::UNAUTHORIZED => {
                let header = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| RegistryError::MissingChallenge {
                        registry: domain.to_string(),
                    })?;
                let challenge = Challenge::parse(header)?;
                Ok(RegistryInfo::from_challenge(domain, challenge, repository))
            }
            status => Err(RegistryError::UnexpectedProbeStatus {
                url,
                status: status.as_u16(),
            }),
        }
    }

    /// Returns cached registry info for `domain`, probing on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails. Failures are not cached.
    pub async fn registry_info(
        &self,
        domain: &str,
        repository: &str,
    ) -> Result<Arc<RegistryInfo>, RegistryError> {
        if let Some(info) = self.cache.get(domain) {
            return Ok(info);
        }

        let info = self.detect(domain, repository).await?;
        tracing::debug!(
            registry = domain,
            auth_method = %info.auth_method,
            "Detected registry auth"
        );
        Ok(self.cache.insert(info))
    }

    /// Exchanges a token URL for a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AuthenticationFailed`] if the endpoint cannot
    /// be reached, answers with a non-success status, or returns no token.
    pub async fn bearer_token(&self, token_url: &str) -> Result<String, RegistryError> {
        let response = self
            .api
            .get(token_url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| RegistryError::AuthenticationFailed {
                message: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(RegistryError::AuthenticationFailed {
                message: format!("token endpoint returned {}", response.status()),
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| RegistryError::AuthenticationFailed {
                    message: format!("invalid token response: {e}"),
                })?;
        body.into_token()
    }

    /// Returns the `Authorization` header for pulling from `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotImplemented`] for basic-auth registries and
    /// an authentication error if the token exchange fails.
    pub async fn authorization(
        &self,
        info: &RegistryInfo,
        repository: &str,
    ) -> Result<Option<HeaderValue>, RegistryError> {
        match info.auth_method {
            AuthMethod::None => Ok(None),
            AuthMethod::Basic => Err(RegistryError::NotImplemented {
                feature: "basic auth",
            }),
            AuthMethod::Bearer => {
                let url = info.token_url_for(repository).ok_or_else(|| {
                    RegistryError::AuthenticationFailed {
                        message: "bearer challenge without a usable realm".to_string(),
                    }
                })?;
                let token = self.bearer_token(&url).await?;
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    RegistryError::AuthenticationFailed {
                        message: "Invalid token".to_string(),
                    }
                })?;
                Ok(Some(value))
            }
        }
    }

    /// Builds a request against the registry API, adding auth and timeout.
    pub(crate) fn api_get(&self, url: &str, auth: Option<&HeaderValue>) -> reqwest::RequestBuilder {
        let mut request = self.api.get(url).timeout(self.config.request_timeout);
        if let Some(auth) = auth {
            request = request.header(reqwest::header::AUTHORIZATION, auth.clone());
        }
        request
    }

    /// Same as [`Self::api_get`] for `HEAD`.
    pub(crate) fn api_head(&self, url: &str, auth: Option<&HeaderValue>) -> reqwest::RequestBuilder {
        let mut request = self.api.head(url).timeout(self.config.request_timeout);
        if let Some(auth) = auth {
            request = request.header(reqwest::header::AUTHORIZATION, auth.clone());
        }
        request
    }

    /// Builds the HTTP client with proper configuration.
    fn build_http_client(
        config: &RegistryConfig,
        redirect: reqwest::redirect::Policy,
    ) -> Result<reqwest::Client, RegistryError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(redirect);

        if let Some(ref tls) = config.tls {
            if tls.insecure_skip_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }

            if let Some(ref ca_cert) = tls.ca_cert {
                let cert_pem = std::fs::read(ca_cert).map_err(|e| RegistryError::Configuration {
                    message: format!("cannot read CA certificate {}: {e}", ca_cert.display()),
                })?;
                let cert = reqwest::Certificate::from_pem(&cert_pem).map_err(|e| {
                    RegistryError::Configuration {
                        message: format!("Invalid CA certificate: {e}"),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }

        builder.build().map_err(|e| RegistryError::Configuration {
            message: e.to_string(),
        })
    }
}
