//! Config route walk and key promotion
//!
//! Every route advertised by `/<version>/config` is read and stored under
//! its last path segment. Keys named by the alias table are promoted onto
//! canonical fields instead. Routes are walked in byte-wise lexicographic
//! order and the first write to a field wins, so `cloud-init.*` keys always
//! take precedence over their `user.*` counterparts.

use crate::config::MetadataConfig;
use crate::error::{MetadataError, Result};
use crate::request::RequestExecutor;
use crate::types::CanonicalField;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Sort config routes into promotion order
///
/// Plain byte comparison, independent of locale.
pub fn sort_routes(routes: &mut [String]) {
    routes.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
}

/// Config key of a route (`/1.0/config/user.user-data` -> `user.user-data`)
pub fn route_key(route: &str) -> &str {
    route.rsplit('/').next().unwrap_or(route)
}

/// Absolute request path for a route as listed by the index
///
/// The key segment is percent-encoded; config keys may hold characters
/// that are not valid in a URI path.
pub fn route_path(route: &str) -> String {
    let route = route.trim_start_matches('/');
    match route.rsplit_once('/') {
        Some((prefix, key)) => format!("/{}/{}", prefix, urlencoding::encode(key)),
        None => format!("/{}", urlencoding::encode(route)),
    }
}

/// Value promoted onto a canonical field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    /// Config key the value came from
    pub source: String,
    /// Raw value
    pub value: String,
}

/// Result of a config walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotedConfig {
    /// Config keys that are not aliases, raw values
    pub config: BTreeMap<String, String>,
    /// Canonical fields claimed by aliased keys
    pub promoted: BTreeMap<CanonicalField, Promotion>,
}

impl PromotedConfig {
    /// Promote `value` onto `field` unless a higher-precedence key got there first
    fn promote(&mut self, key: &str, field: CanonicalField, value: String) {
        if let Some(existing) = self.promoted.get(&field) {
            debug!(
                key = %key,
                winner = %existing.source,
                field = %field,
                "Ignoring config key in favor of higher-precedence value"
            );
            return;
        }
        self.promoted.insert(
            field,
            Promotion {
                source: key.to_string(),
                value,
            },
        );
    }

    /// Promoted value of a field
    pub fn value(&self, field: CanonicalField) -> Option<&str> {
        self.promoted.get(&field).map(|p| p.value.as_str())
    }
}

/// Walks config routes and promotes aliased keys
#[derive(Debug)]
pub struct ConfigPromoter<'a> {
    config: &'a MetadataConfig,
}

impl<'a> ConfigPromoter<'a> {
    pub fn new(config: &'a MetadataConfig) -> Self {
        Self { config }
    }

    /// Read every config route and promote aliased keys
    ///
    /// An unavailable or malformed index means no extra config is present.
    /// Individual routes that fail are skipped.
    pub async fn collect(&self, executor: &mut RequestExecutor<'_>) -> Result<PromotedConfig> {
        let index = self.config.route("config");
        let mut routes: Vec<String> = match executor.get_json(&index, false).await {
            Ok(routes) => routes,
            Err(MetadataError::Format { url, body }) => {
                warn!(route = %url, body = %body, "Config index is not a JSON list, ignoring");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        sort_routes(&mut routes);

        let mut collected = PromotedConfig::default();
        for route in &routes {
            let path = route_path(route);
            let response = match executor.get_checked(&path, false).await {
                Ok(response) => response,
                Err(MetadataError::InvalidRequest { route, source }) => {
                    debug!(route = %route, error = %source, "Skipping unrequestable config route");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !response.is_success() {
                debug!(
                    route = %path,
                    status = response.status.as_u16(),
                    body = %response.text(),
                    "Skipping config route"
                );
                continue;
            }

            let key = route_key(route);
            let value = response.text();
            match self.config.aliases.resolve(key) {
                Some(field) => collected.promote(key, field, value),
                None => {
                    collected.config.insert(key.to_string(), value);
                }
            }
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AliasTable, RetryPolicy};
    use crate::test_server::FakeGuestApi;
    use crate::transport::SocketTransport;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn collect(server: &FakeGuestApi, config: &MetadataConfig) -> PromotedConfig {
        let mut session = SocketTransport::new(server.path(), "incus")
            .open()
            .await
            .unwrap();
        let mut executor =
            RequestExecutor::new(&mut session, RetryPolicy::new(3, Duration::from_millis(1)));
        ConfigPromoter::new(config)
            .collect(&mut executor)
            .await
            .unwrap()
    }

    #[test]
    fn test_sort_routes_is_bytewise() {
        let mut routes = vec![
            "/1.0/config/user.user-data".to_string(),
            "/1.0/config/cloud-init.user-data".to_string(),
            "/1.0/config/User.zzz".to_string(),
            "/1.0/config/user.meta-data".to_string(),
        ];
        sort_routes(&mut routes);
        // Uppercase sorts before lowercase in byte order
        assert_eq!(
            routes,
            vec![
                "/1.0/config/User.zzz",
                "/1.0/config/cloud-init.user-data",
                "/1.0/config/user.meta-data",
                "/1.0/config/user.user-data",
            ]
        );
    }

    #[test]
    fn test_route_helpers() {
        assert_eq!(route_key("/1.0/config/user.user-data"), "user.user-data");
        assert_eq!(route_key("user.user-data"), "user.user-data");
        assert_eq!(route_path("1.0/config/user.foo"), "/1.0/config/user.foo");
        assert_eq!(route_path("/1.0/config/user.foo"), "/1.0/config/user.foo");
        assert_eq!(route_path("/1.0/config/user.my key"), "/1.0/config/user.my%20key");
        assert_eq!(route_path("user.a/b"), "/user.a/b");
    }

    #[tokio::test]
    async fn test_cloud_init_keys_take_precedence() {
        let server = FakeGuestApi::start()
            .await
            .route(
                "/1.0/config",
                200,
                r#"["/1.0/config/user.user-data", "/1.0/config/cloud-init.user-data",
                    "/1.0/config/user.network-config", "/1.0/config/cloud-init.vendor-data",
                    "/1.0/config/user.vendor-data"]"#,
            )
            .route("/1.0/config/user.user-data", 200, "B")
            .route("/1.0/config/cloud-init.user-data", 200, "A")
            .route("/1.0/config/user.network-config", 200, "version: 2")
            .route("/1.0/config/cloud-init.vendor-data", 200, "V1")
            .route("/1.0/config/user.vendor-data", 200, "V2");

        let collected = collect(&server, &MetadataConfig::default()).await;

        assert_eq!(collected.value(CanonicalField::UserData), Some("A"));
        assert_eq!(collected.value(CanonicalField::VendorData), Some("V1"));
        assert_eq!(collected.value(CanonicalField::NetworkConfig), Some("version: 2"));
        assert_eq!(
            collected.promoted[&CanonicalField::UserData].source,
            "cloud-init.user-data"
        );
        // Aliased keys never stay in the flat config map
        assert!(collected.config.is_empty());

        // Routes are fetched in sorted order
        let fetched: Vec<String> = server
            .requests()
            .into_iter()
            .filter(|p| p.starts_with("/1.0/config/"))
            .collect();
        assert_eq!(
            fetched,
            vec![
                "/1.0/config/cloud-init.user-data",
                "/1.0/config/cloud-init.vendor-data",
                "/1.0/config/user.network-config",
                "/1.0/config/user.user-data",
                "/1.0/config/user.vendor-data",
            ]
        );
    }

    #[tokio::test]
    async fn test_unmatched_keys_kept_and_failures_skipped() {
        let server = FakeGuestApi::start()
            .await
            .route(
                "/1.0/config",
                200,
                r#"["1.0/config/user.meta-data", "1.0/config/user.gone", "1.0/config/user.foo"]"#,
            )
            .route("/1.0/config/user.meta-data", 200, "local-hostname: box")
            .route("/1.0/config/user.foo", 200, "bar")
            .route("/1.0/config/user.gone", 403, "forbidden");

        let collected = collect(&server, &MetadataConfig::default()).await;

        assert!(collected.promoted.is_empty());
        assert_eq!(collected.config.len(), 2);
        assert_eq!(collected.config["user.meta-data"], "local-hostname: box");
        assert_eq!(collected.config["user.foo"], "bar");
    }

    #[tokio::test]
    async fn test_unavailable_or_malformed_index_is_empty() {
        let server = FakeGuestApi::start().await;
        let collected = collect(&server, &MetadataConfig::default()).await;
        assert_eq!(collected, PromotedConfig::default());

        let server = FakeGuestApi::start()
            .await
            .route("/1.0/config", 200, "{not json");
        let collected = collect(&server, &MetadataConfig::default()).await;
        assert_eq!(collected, PromotedConfig::default());
    }

    #[tokio::test]
    async fn test_awkward_route_does_not_abort_walk() {
        let server = FakeGuestApi::start()
            .await
            .route(
                "/1.0/config",
                200,
                r#"["/1.0/config/user.user-data", "/1.0/config/user.my key",
                    "/1.0/con fig/user.broken"]"#,
            )
            .route("/1.0/config/user.user-data", 200, "#cloud-config")
            .route("/1.0/config/user.my%20key", 200, "spaced");

        let collected = collect(&server, &MetadataConfig::default()).await;

        assert_eq!(collected.value(CanonicalField::UserData), Some("#cloud-config"));
        assert_eq!(collected.config.len(), 1);
        assert_eq!(collected.config["user.my key"], "spaced");
        // A route that cannot form a request is never sent
        assert!(!server.requests().iter().any(|p| p.contains("user.broken")));
    }

    #[test]
    fn test_override_is_logged_at_debug() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut collected = PromotedConfig::default();
        tracing::subscriber::with_default(subscriber, || {
            collected.promote("cloud-init.user-data", CanonicalField::UserData, "A".to_string());
            collected.promote("user.user-data", CanonicalField::UserData, "B".to_string());
        });

        assert_eq!(collected.value(CanonicalField::UserData), Some("A"));
        let output = logs.contents();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("DEBUG"));
        assert!(output.contains("key=user.user-data"));
        assert!(output.contains("winner=cloud-init.user-data"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_substituted_alias_table() {
        let server = FakeGuestApi::start()
            .await
            .route("/1.0/config", 200, r#"["/1.0/config/custom.ud", "/1.0/config/user.user-data"]"#)
            .route("/1.0/config/custom.ud", 200, "custom")
            .route("/1.0/config/user.user-data", 200, "plain");

        let config = MetadataConfig::default()
            .with_aliases(AliasTable::new([("custom.ud", CanonicalField::UserData)]));
        let collected = collect(&server, &config).await;

        assert_eq!(collected.value(CanonicalField::UserData), Some("custom"));
        assert_eq!(collected.config["user.user-data"], "plain");
    }
}
