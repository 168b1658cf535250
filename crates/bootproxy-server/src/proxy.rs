//! Streaming reverse proxy for registry blobs.
//!
//! Boot firmware cannot speak the registry auth protocol or handle some
//! registry response quirks. [`BlobProxy`] fetches a blob with the right
//! credentials, follows the storage redirect registries answer with, fixes
//! up the response headers and streams the body through unbuffered.

use crate::error::{ProxyError, Result};
use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;
use bootproxy_registry::{Digest, ImageName, MediaType, RegistryClient, RegistryInfo};
use url::Url;

/// How many `307` redirects are followed before the response is passed to
/// the client as-is.
pub const MAX_REDIRECT_HOPS: usize = 1;

/// Headers scoped to a single connection, never forwarded in either direction.
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

/// Reverse proxy for blob downloads.
#[derive(Debug, Clone)]
pub struct BlobProxy {
    client: RegistryClient,
}

impl BlobProxy {
    /// Creates a proxy sending upstream requests through `client`.
    #[must_use]
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Proxies the blob `digest` of `image` to the caller.
    ///
    /// `inbound` are the client's request headers; end-to-end headers such as
    /// `Range` are forwarded, and `Authorization` is replaced by `auth`, the
    /// registry credentials negotiated for `info`.
    pub async fn proxy(
        &self,
        inbound: &HeaderMap,
        image: &ImageName,
        digest: &Digest,
        info: &RegistryInfo,
        auth: Option<HeaderValue>,
    ) -> Result<Response> {
        let target = self.client.blob_url(image, digest);

        let mut headers = forward_request_headers(inbound);
        if let Some(auth) = auth {
            headers.insert(header::AUTHORIZATION, auth);
        }

        tracing::info!(
            target_url = %target,
            auth_method = %info.auth_method,
            "Proxying registry request"
        );

        let mut response = self.send(&target, &headers).await?;
        let mut hops = 0;
        while response.status() == StatusCode::TEMPORARY_REDIRECT && hops < MAX_REDIRECT_HOPS {
            let location = redirect_location(&response)?;
            tracing::debug!(location = %location, "Following blob redirect");
            response = self.send(location.as_str(), &headers).await?;
            hops += 1;
        }

        Ok(into_client_response(response))
    }

    async fn send(&self, url: &str, headers: &HeaderMap) -> Result<reqwest::Response> {
        self.client
            .passthrough_http()
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|source| ProxyError::Upstream {
                url: url.to_string(),
                source,
            })
    }
}

/// Copies end-to-end request headers, dropping hop-by-hop headers, `Host`
/// and the client's own credentials.
fn forward_request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == header::HOST || name == header::AUTHORIZATION {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Resolves the `Location` of a redirect against the URL that produced it.
fn redirect_location(response: &reqwest::Response) -> Result<Url> {
    let invalid = || ProxyError::InvalidRedirect {
        url: response.url().to_string(),
    };
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(invalid)?;
    response.url().join(location).map_err(|_| invalid())
}

/// Rewrites upstream response headers for boot clients.
///
/// UKI layers are labelled `application/efi`. When the body length is known,
/// `Content-Length` is set so the response is not sent chunked.
fn rewrite_response_headers(upstream: &HeaderMap, content_length: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let is_uki = headers
        .get(header::CONTENT_TYPE)
        .is_some_and(|ct| ct.as_bytes() == MediaType::UKI.as_bytes());
    if is_uki {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(MediaType::EFI),
        );
    }

    if !headers.contains_key(header::CONTENT_LENGTH) {
        if let Some(len) = content_length.filter(|len| *len > 0) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
    }

    headers
}

fn into_client_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = rewrite_response_headers(upstream.headers(), upstream.content_length());

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
