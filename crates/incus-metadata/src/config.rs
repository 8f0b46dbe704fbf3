//! Client configuration
//!
//! Socket location, API version, retry limits and the alias table are
//! grouped in one [`MetadataConfig`] value that is built once and passed by
//! reference to every component.

use crate::types::CanonicalField;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known guest API socket
pub const DEFAULT_SOCKET_PATH: &str = "/dev/incus/sock";

/// Guest API version this client speaks
pub const DEFAULT_API_VERSION: &str = "1.0";

/// Host header sent with every request
pub const DEFAULT_AUTHORITY: &str = "incus";

/// Attempts made while the server keeps answering HTTP 500
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Pause between attempts on HTTP 500
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry behaviour for transient server errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of GETs issued for one route (at least 1)
    pub max_attempts: u32,
    /// Fixed delay between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// What to do with a fragment whose content kind is not text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FragmentPolicy {
    /// Log it, record the issue and emit the fragment as `text/plain`
    #[default]
    Lenient,
    /// Fail the whole composite assembly
    Strict,
}

/// Provider config key to canonical field mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<String, CanonicalField>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new([
            ("cloud-init.user-data", CanonicalField::UserData),
            ("cloud-init.network-config", CanonicalField::NetworkConfig),
            ("cloud-init.vendor-data", CanonicalField::VendorData),
            ("user.user-data", CanonicalField::UserData),
            ("user.network-config", CanonicalField::NetworkConfig),
            ("user.vendor-data", CanonicalField::VendorData),
        ])
    }
}

impl AliasTable {
    /// Build a table from `(provider key, field)` pairs
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, CanonicalField)>) -> Self {
        Self {
            aliases: entries
                .into_iter()
                .map(|(key, field)| (key.into(), field))
                .collect(),
        }
    }

    /// Canonical field a config key is promoted onto
    pub fn resolve(&self, key: &str) -> Option<CanonicalField> {
        self.aliases.get(key).copied()
    }

    /// Canonical field a multi-part fragment key contributes to
    ///
    /// `user.vendor-data.extra` belongs to `vendor-data` because it extends
    /// the aliased key `user.vendor-data` with a dot. The suffix may be empty.
    pub fn fragment_field(&self, key: &str) -> Option<CanonicalField> {
        self.aliases
            .iter()
            .filter(|(_, field)| field.accepts_fragments())
            .find(|(alias, _)| {
                key.strip_prefix(alias.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
            })
            .map(|(_, field)| *field)
    }

    /// Every aliased provider key, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Configuration for a guest API client
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Unix socket the guest API listens on
    pub socket_path: PathBuf,

    /// API version prefix (`1.0`)
    pub api_version: String,

    /// Authority used in the Host header
    pub authority: String,

    /// Retry behaviour on HTTP 500
    pub retry: RetryPolicy,

    /// Provider key aliases
    pub aliases: AliasTable,

    /// Handling of unclassifiable fragments
    pub fragment_policy: FragmentPolicy,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            api_version: DEFAULT_API_VERSION.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            retry: RetryPolicy::default(),
            aliases: AliasTable::default(),
            fragment_policy: FragmentPolicy::default(),
        }
    }
}

impl MetadataConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set the API version
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Set the Host header authority
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the alias table
    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    /// Set the fragment policy
    pub fn with_fragment_policy(mut self, policy: FragmentPolicy) -> Self {
        self.fragment_policy = policy;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Route of a category under the API version prefix
    pub fn route(&self, name: &str) -> String {
        format!("/{}/{}", self.api_version, name.trim_start_matches('/'))
    }

    /// Human-readable platform description
    pub fn subplatform(&self) -> String {
        format!(
            "Incus socket API v. {} ({})",
            self.api_version,
            self.socket_path.display()
        )
    }
}
