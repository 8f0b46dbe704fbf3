//! Metadata reader
//!
//! Drives one read of the guest API: opens a session, fetches the requested
//! categories, promotes aliased config keys and merges user-data and
//! vendor-data fragments.
//!
//! # Precedence
//!
//! - `cloud-init.*` config keys beat `user.*` keys for the same field
//! - A field with a single source keeps its raw value
//! - A field with several sources becomes a multi-part document, the
//!   promoted value first and `<alias>.<suffix>` fragments after it in
//!   sorted key order

use crate::config::MetadataConfig;
use crate::error::{MetadataError, Result};
use crate::payload::{PayloadAssembler, PayloadFragment};
use crate::probe::is_platform_viable;
use crate::promote::{ConfigPromoter, Promotion};
use crate::request::RequestExecutor;
use crate::transport::{Session, SocketTransport};
use crate::types::{CanonicalField, DeviceDescriptor, MetadataBundle, MetadataKey, MetadataKeys};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Reads instance metadata from the guest API socket
#[derive(Debug, Clone, Default)]
pub struct MetadataReader {
    config: MetadataConfig,
}

impl MetadataReader {
    pub fn new(config: MetadataConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    /// Whether the guest API socket is present on this platform
    pub fn is_viable(&self) -> bool {
        is_platform_viable(self.config.socket_path())
    }

    /// Read the requested categories with the configured API version
    pub async fn read(&self, keys: MetadataKeys) -> Result<MetadataBundle> {
        self.read_version(&self.config.api_version, keys).await
    }

    /// Read the requested categories with an explicit API version
    ///
    /// The session is closed before returning, on success and on failure.
    pub async fn read_version(&self, api_version: &str, keys: MetadataKeys) -> Result<MetadataBundle> {
        let config: Cow<'_, MetadataConfig> = if api_version == self.config.api_version {
            Cow::Borrowed(&self.config)
        } else {
            Cow::Owned(self.config.clone().with_api_version(api_version))
        };

        let mut session = SocketTransport::from_config(&config).open().await?;
        let result = read_with(&config, &mut session, keys).await;
        session.close();

        if let Ok(bundle) = &result {
            info!(
                api_version = %bundle.api_version,
                config_keys = bundle.config.len(),
                user_data = bundle.user_data.is_some(),
                vendor_data = bundle.vendor_data.is_some(),
                network_config = bundle.network_config.is_some(),
                "Read guest API metadata"
            );
        }
        result
    }

    /// Whether the instance id reported by meta-data equals `expected`
    pub async fn check_instance_id(&self, expected: &str) -> Result<bool> {
        let bundle = self.read(MetadataKeys::only(MetadataKey::MetaData)).await?;
        let current = bundle.instance_id()?;
        debug!(current = ?current, expected = %expected, "Checked instance id");
        Ok(current.as_deref() == Some(expected))
    }
}

async fn read_with(
    config: &MetadataConfig,
    session: &mut Session,
    keys: MetadataKeys,
) -> Result<MetadataBundle> {
    let mut bundle = MetadataBundle::new(config.api_version.clone());
    let mut executor = RequestExecutor::new(session, config.retry);

    if keys.contains(MetadataKey::MetaData) {
        let response = executor
            .get_checked(&config.route(MetadataKey::MetaData.route()), true)
            .await?;
        bundle.meta_data = Some(response.text());
    }

    let mut promoted = BTreeMap::new();
    if keys.contains(MetadataKey::Config) {
        let collected = ConfigPromoter::new(config).collect(&mut executor).await?;
        bundle.config = collected.config;
        promoted = collected.promoted;
    }

    if keys.contains(MetadataKey::Devices) {
        let route = config.route(MetadataKey::Devices.route());
        match executor
            .get_json::<BTreeMap<String, serde_json::Value>>(&route, false)
            .await
        {
            Ok(raw) => {
                let devices = parse_devices(raw);
                if devices.is_empty() {
                    debug!(route = %route, "No devices exposed");
                } else {
                    bundle.devices = Some(devices);
                }
            }
            Err(MetadataError::Format { url, body }) => {
                warn!(route = %url, body = %body, "Devices route is not a JSON object, ignoring")
            }
            Err(e) => return Err(e),
        }
    }

    merge_fields(config, &mut bundle, promoted)?;
    Ok(bundle)
}

/// Decode device descriptors one by one, dropping entries that do not fit
fn parse_devices(raw: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, DeviceDescriptor> {
    raw.into_iter()
        .filter_map(|(name, value)| match serde_json::from_value(value) {
            Ok(device) => Some((name, device)),
            Err(e) => {
                warn!(device = %name, error = %e, "Ignoring malformed device entry");
                None
            }
        })
        .collect()
}

/// Fill canonical fields from promoted values and config fragments
fn merge_fields(
    config: &MetadataConfig,
    bundle: &mut MetadataBundle,
    promoted: BTreeMap<CanonicalField, Promotion>,
) -> Result<()> {
    let mut fragments: BTreeMap<CanonicalField, Vec<PayloadFragment>> = BTreeMap::new();

    for (field, promotion) in promoted {
        if field.accepts_fragments() {
            fragments
                .entry(field)
                .or_default()
                .push(PayloadFragment::new(field.as_str(), promotion.value));
        } else {
            *bundle.field_mut(field) = Some(promotion.value);
        }
    }

    let fragment_keys: Vec<String> = bundle
        .config
        .keys()
        .filter(|key| config.aliases.fragment_field(key).is_some())
        .cloned()
        .collect();
    for key in fragment_keys {
        if let (Some(field), Some(text)) =
            (config.aliases.fragment_field(&key), bundle.config.remove(&key))
        {
            fragments
                .entry(field)
                .or_default()
                .push(PayloadFragment::new(key, text));
        }
    }

    let assembler = PayloadAssembler::new(config.fragment_policy);
    for (field, mut parts) in fragments {
        let value = if parts.len() == 1 {
            parts.remove(0).text
        } else {
            let composite = assembler.assemble(&parts)?;
            for issue in &composite.issues {
                warn!(field = %field, key = %issue.key, reason = %issue.reason, "Fragment accepted as plain text");
            }
            debug!(field = %field, parts = parts.len(), "Merged fragments into multi-part payload");
            composite.document
        };
        *bundle.field_mut(field) = Some(value);
    }

    Ok(())
}
