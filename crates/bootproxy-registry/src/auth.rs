//! Registry authentication discovery.
//!
//! A registry's `/v2/` endpoint tells an anonymous client how to
//! authenticate: `200` means no auth, `401` carries a `WWW-Authenticate`
//! challenge naming the scheme. Bearer challenges point at a token realm
//! that hands out short-lived pull tokens scoped to one repository.

use crate::error::RegistryError;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// How a registry expects anonymous pull requests to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Anonymous access.
    None,
    /// Basic username:password.
    Basic,
    /// Bearer token fetched from a token realm.
    Bearer,
}

impl AuthMethod {
    /// Returns a string representation for display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Bearer => "bearer",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// `Basic realm="..."`.
    Basic {
        /// Realm, if given.
        realm: Option<String>,
    },
    /// `Bearer realm="..." service="..."`.
    Bearer {
        /// Token endpoint.
        realm: String,
        /// Service the token is requested for.
        service: Option<String>,
    },
}

impl Challenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedAuth`] for unknown schemes and for
    /// bearer challenges without a realm.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::Challenge;
    ///
    /// let challenge = Challenge::parse(r#"Bearer realm="https://ghcr.io/token",service="ghcr.io""#).unwrap();
    /// assert!(matches!(challenge, Challenge::Bearer { .. }));
    /// ```
    pub fn parse(header: &str) -> Result<Self, RegistryError> {
        let header = header.trim();
        let unsupported = || RegistryError::UnsupportedAuth {
            challenge: header.to_string(),
        };

        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        let params = parse_params(params);

        if scheme.eq_ignore_ascii_case("bearer") {
            let realm = params.get("realm").cloned().ok_or_else(unsupported)?;
            Ok(Self::Bearer {
                realm,
                service: params.get("service").cloned(),
            })
        } else if scheme.eq_ignore_ascii_case("basic") {
            Ok(Self::Basic {
                realm: params.get("realm").cloned(),
            })
        } else {
            Err(unsupported())
        }
    }
}

/// Splits `key="value", key2=value2` challenge parameters, respecting quotes.
///
/// Whitespace outside quotes also separates parameters, which some registries
/// emit instead of commas.
fn parse_params(params: &str) -> HashMap<String, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, ch) in params.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if !in_quotes && (c == ',' || c.is_whitespace()) => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);

    parts
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

/// Builds the pull-token URL for `repository` from a bearer challenge.
///
/// Query parameters already on the realm are kept. Returns `None` when the
/// realm is not an absolute URL.
///
/// # Examples
///
/// ```
/// use bootproxy_registry::token_url;
///
/// assert_eq!(
///     token_url("https://ghcr.io/token", Some("ghcr.io"), "org/os").as_deref(),
///     Some("https://ghcr.io/token?service=ghcr.io&scope=repository:org/os:pull"),
/// );
/// ```
#[must_use]
pub fn token_url(realm: &str, service: Option<&str>, repository: &str) -> Option<String> {
    let mut url = url::Url::parse(realm).ok()?;
    let mut pairs: Vec<String> = url
        .query()
        .filter(|q| !q.is_empty())
        .map(ToString::to_string)
        .into_iter()
        .collect();
    if let Some(service) = service.filter(|s| !s.is_empty()) {
        pairs.push(format!("service={service}"));
    }
    pairs.push(format!("scope=repository:{repository}:pull"));
    // set_query escapes what a query may not hold and leaves `:` and `/` as is.
    url.set_query(Some(&pairs.join("&")));
    Some(url.into())
}

/// Authentication facts about one registry domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    /// Registry domain.
    pub domain: String,

    /// Detected auth method.
    pub auth_method: AuthMethod,

    /// Token URL for the repository used during detection (bearer only).
    pub token_url: Option<String>,

    /// Challenge realm.
    pub realm: Option<String>,

    /// Challenge service (bearer only).
    pub service: Option<String>,
}

impl RegistryInfo {
    /// Info for a registry allowing anonymous access.
    #[must_use]
    pub fn anonymous(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            auth_method: AuthMethod::None,
            token_url: None,
            realm: None,
            service: None,
        }
    }

    /// Builds registry info from a challenge seen while probing for `repository`.
    #[must_use]
    pub fn from_challenge(domain: impl Into<String>, challenge: Challenge, repository: &str) -> Self {
        let domain = domain.into();
        match challenge {
            Challenge::Basic { realm } => Self {
                domain,
                auth_method: AuthMethod::Basic,
                token_url: None,
                realm,
                service: None,
            },
            Challenge::Bearer { realm, service } => Self {
                token_url: token_url(&realm, service.as_deref(), repository),
                domain,
                auth_method: AuthMethod::Bearer,
                realm: Some(realm),
                service,
            },
        }
    }

    /// Returns the pull-token URL for `repository`, for bearer registries.
    ///
    /// Entries are shared by every repository on the domain, so the scope is
    /// derived per call rather than taken from [`Self::token_url`].
    #[must_use]
    pub fn token_url_for(&self, repository: &str) -> Option<String> {
        match (self.auth_method, &self.realm) {
            (AuthMethod::Bearer, Some(realm)) => {
                token_url(realm, self.service.as_deref(), repository)
            }
            _ => None,
        }
    }
}

/// Per-domain cache of detected registry auth.
///
/// Entries live for the lifetime of the cache; there is no expiry. Two
/// concurrent first-time lookups for one domain may both probe, and the
/// last write wins. Both results describe the same registry.
#[derive(Debug, Default)]
pub struct RegistryCache {
    entries: RwLock<HashMap<String, Arc<RegistryInfo>>>,
}

impl RegistryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached entry for `domain`.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<Arc<RegistryInfo>> {
        self.entries.read().get(domain).cloned()
    }

    /// Stores `info`, replacing any entry for the same domain.
    pub fn insert(&self, info: RegistryInfo) -> Arc<RegistryInfo> {
        let info = Arc::new(info);
        self.entries
            .write()
            .insert(info.domain.clone(), Arc::clone(&info));
        info
    }

    /// Number of cached domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Body of a token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Result<String, RegistryError> {
        self.token
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| RegistryError::AuthenticationFailed {
                message: "token endpoint returned no token".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge =
            Challenge::parse(r#"Bearer realm="https://ghcr.io/token" service="ghcr.io""#).unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://ghcr.io/token".to_string(),
                service: Some("ghcr.io".to_string()),
            }
        );

        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/ubuntu:pull""#,
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_basic_challenge() {
        let challenge = Challenge::parse(r#"Basic realm="Registry Realm""#).unwrap();
        assert_eq!(
            challenge,
            Challenge::Basic {
                realm: Some("Registry Realm".to_string())
            }
        );
    }

    #[test]
    fn test_parse_unsupported_challenge() {
        assert!(Challenge::parse("Negotiate abc").is_err());
        assert!(Challenge::parse(r#"Bearer service="x""#).is_err());
        assert!(Challenge::parse("").is_err());
    }

    #[test]
    fn test_token_url() {
        assert_eq!(
            token_url("https://ghcr.io/token", Some("ghcr.io"), "org/os").as_deref(),
            Some("https://ghcr.io/token?service=ghcr.io&scope=repository:org/os:pull")
        );
        assert_eq!(
            token_url("https://r.example.com/auth", None, "a/b").as_deref(),
            Some("https://r.example.com/auth?scope=repository:a/b:pull")
        );
        assert_eq!(
            token_url("https://r.example.com/auth?x=1", Some(""), "a/b").as_deref(),
            Some("https://r.example.com/auth?x=1&scope=repository:a/b:pull")
        );
    }

    #[test]
    fn test_token_url_escapes_service() {
        assert_eq!(
            token_url("https://r.example.com/auth", Some("my registry"), "a/b").as_deref(),
            Some("https://r.example.com/auth?service=my%20registry&scope=repository:a/b:pull")
        );
        assert_eq!(token_url("/token", Some("x"), "a/b"), None);
    }

    #[test]
    fn test_registry_info_token_url_per_repository() {
        let challenge = Challenge::Bearer {
            realm: "https://ghcr.io/token".to_string(),
            service: Some("ghcr.io".to_string()),
        };
        let info = RegistryInfo::from_challenge("ghcr.io", challenge, "org/os");
        assert_eq!(info.auth_method, AuthMethod::Bearer);
        assert_eq!(
            info.token_url.as_deref(),
            Some("https://ghcr.io/token?service=ghcr.io&scope=repository:org/os:pull")
        );
        assert_eq!(
            info.token_url_for("org/other").as_deref(),
            Some("https://ghcr.io/token?service=ghcr.io&scope=repository:org/other:pull")
        );
        assert_eq!(RegistryInfo::anonymous("quay.io").token_url_for("a"), None);
    }

    #[test]
    fn test_registry_cache() {
        let cache = RegistryCache::new();
        assert!(cache.is_empty());
        cache.insert(RegistryInfo::anonymous("quay.io"));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("quay.io").map(|i| i.auth_method),
            Some(AuthMethod::None)
        );
        assert!(cache.get("ghcr.io").is_none());
    }

    #[test]
    fn test_token_response() {
        let r: TokenResponse = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(r.into_token().unwrap(), "abc");
        let r: TokenResponse = serde_json::from_str(r#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(r.into_token().unwrap(), "xyz");
        let r: TokenResponse = serde_json::from_str(r#"{"token":""}"#).unwrap();
        assert!(r.into_token().is_err());
    }
}
