//! Registry admission control.
//!
//! An allow-list, when configured, admits only its members. Otherwise a
//! block-list admits everything except its members. With neither list
//! configured every registry is denied.

use std::collections::HashSet;

/// Environment variable holding the allow-list.
pub const ALLOWED_REGISTRIES_ENV: &str = "ALLOWED_REGISTRIES";

/// Environment variable holding the block-list.
pub const BLOCKED_REGISTRIES_ENV: &str = "BLOCKED_REGISTRIES";

/// Decides which registries the proxy may contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryPolicy {
    allowed: Option<HashSet<String>>,
    blocked: Option<HashSet<String>>,
}

impl RegistryPolicy {
    /// Builds a policy from comma-separated lists.
    ///
    /// Items are trimmed and matched exactly. An empty list counts as not
    /// configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use bootproxy_registry::RegistryPolicy;
    ///
    /// let policy = RegistryPolicy::from_lists("a.com,b.com", "a.com");
    /// assert!(policy.is_allowed("a.com"));
    /// assert!(!policy.is_allowed("c.com"));
    /// ```
    #[must_use]
    pub fn from_lists(allowed: &str, blocked: &str) -> Self {
        Self {
            allowed: parse_list(allowed),
            blocked: parse_list(blocked),
        }
    }

    /// Reads [`ALLOWED_REGISTRIES_ENV`] and [`BLOCKED_REGISTRIES_ENV`].
    #[must_use]
    pub fn from_env() -> Self {
        let allowed = std::env::var(ALLOWED_REGISTRIES_ENV).unwrap_or_default();
        let blocked = std::env::var(BLOCKED_REGISTRIES_ENV).unwrap_or_default();
        Self::from_lists(&allowed, &blocked)
    }

    /// Returns true if `domain` may be contacted.
    #[must_use]
    pub fn is_allowed(&self, domain: &str) -> bool {
        if let Some(allowed) = &self.allowed {
            return allowed.contains(domain);
        }
        if let Some(blocked) = &self.blocked {
            return !blocked.contains(domain);
        }
        false
    }

    /// Returns a short description of the active mode for log records.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match (&self.allowed, &self.blocked) {
            (Some(_), _) => "allow-list",
            (None, Some(_)) => "block-list",
            (None, None) => "deny-all",
        }
    }
}

fn parse_list(list: &str) -> Option<HashSet<String>> {
    let items: HashSet<String> = list
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}
