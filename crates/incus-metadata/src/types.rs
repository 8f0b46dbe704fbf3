//! Metadata types
//!
//! Request selectors, canonical field names and the aggregate bundle handed
//! back to the boot framework.

use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A category of guest API data that can be requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataKey {
    /// `/<version>/meta-data`
    MetaData,
    /// `/<version>/config` and every route it lists
    Config,
    /// `/<version>/devices`
    Devices,
}

impl MetadataKey {
    /// Every category, in fetch order
    pub const VARIANTS: [MetadataKey; 3] =
        [MetadataKey::MetaData, MetadataKey::Config, MetadataKey::Devices];

    /// Route name of the category under the API version prefix
    pub fn route(self) -> &'static str {
        match self {
            MetadataKey::MetaData => "meta-data",
            MetadataKey::Config => "config",
            MetadataKey::Devices => "devices",
        }
    }

    fn bit(self) -> u8 {
        match self {
            MetadataKey::MetaData => 0b001,
            MetadataKey::Config => 0b010,
            MetadataKey::Devices => 0b100,
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route())
    }
}

impl FromStr for MetadataKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "meta-data" | "meta_data" => Ok(MetadataKey::MetaData),
            "config" => Ok(MetadataKey::Config),
            "devices" => Ok(MetadataKey::Devices),
            other => Err(format!("unknown metadata key: {}", other)),
        }
    }
}

/// Set of requested metadata categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataKeys {
    bits: u8,
}

impl MetadataKeys {
    /// Nothing requested
    pub const NONE: MetadataKeys = MetadataKeys { bits: 0 };

    /// Every category
    pub const ALL: MetadataKeys = MetadataKeys { bits: 0b111 };

    /// Set holding a single category
    pub fn only(key: MetadataKey) -> Self {
        Self::NONE.with(key)
    }

    /// Add a category
    pub fn with(mut self, key: MetadataKey) -> Self {
        self.bits |= key.bit();
        self
    }

    /// Whether a category was requested
    pub fn contains(&self, key: MetadataKey) -> bool {
        self.bits & key.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Requested categories, in fetch order
    pub fn iter(&self) -> impl Iterator<Item = MetadataKey> + '_ {
        MetadataKey::VARIANTS
            .into_iter()
            .filter(move |key| self.contains(*key))
    }
}

impl From<MetadataKey> for MetadataKeys {
    fn from(key: MetadataKey) -> Self {
        Self::only(key)
    }
}

impl FromIterator<MetadataKey> for MetadataKeys {
    fn from_iter<I: IntoIterator<Item = MetadataKey>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, |keys, key| keys.with(key))
    }
}

impl FromStr for MetadataKeys {
    type Err = String;

    /// Parses `all`, `none`, or a comma-separated list of categories
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Self::ALL),
            "none" | "" => Ok(Self::NONE),
            list => list.split(',').map(str::parse::<MetadataKey>).collect(),
        }
    }
}

/// Normalized top-level field a provider key can be promoted onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalField {
    UserData,
    VendorData,
    NetworkConfig,
}

impl CanonicalField {
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::UserData => "user-data",
            CanonicalField::VendorData => "vendor-data",
            CanonicalField::NetworkConfig => "network-config",
        }
    }

    /// Fields that may be split across several config keys and merged as a
    /// multi-part document
    pub fn accepts_fragments(self) -> bool {
        matches!(self, CanonicalField::UserData | CanonicalField::VendorData)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config keys whose values must not be exposed to unprivileged readers
///
/// Keys extending one of these with a dotted suffix are sensitive too.
pub const SENSITIVE_CONFIG_KEYS: &[&str] = &[
    "user.meta-data",
    "user.vendor-data",
    "user.user-data",
    "cloud-init.user-data",
    "cloud-init.vendor-data",
];

/// Replacement for redacted values
pub const REDACTED: &str = "REDACTED";

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_CONFIG_KEYS.iter().any(|sensitive| {
        key.strip_prefix(sensitive)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}

/// Descriptor of one device from `/<version>/devices`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device type (`nic`, `disk`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Remaining device properties, verbatim
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Aggregate result of one metadata read
///
/// Serializes with the field names the boot framework consumes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetadataBundle {
    /// API version the data was read with
    #[serde(rename = "_metadata_api_version")]
    pub api_version: String,

    /// Raw meta-data (YAML or JSON text)
    #[serde(rename = "meta-data", default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<String>,

    /// Config keys that were not promoted or merged, raw values
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Devices exposed to the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<BTreeMap<String, DeviceDescriptor>>,

    /// User-data, raw or composite
    #[serde(rename = "user-data", default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    /// Vendor-data, raw or composite
    #[serde(rename = "vendor-data", default, skip_serializing_if = "Option::is_none")]
    pub vendor_data: Option<String>,

    /// Raw network configuration
    #[serde(rename = "network-config", default, skip_serializing_if = "Option::is_none")]
    pub network_config: Option<String>,
}

impl MetadataBundle {
    /// Create an empty bundle stamped with an API version
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            ..Default::default()
        }
    }

    /// Value of a canonical field
    pub fn field(&self, field: CanonicalField) -> Option<&str> {
        match field {
            CanonicalField::UserData => self.user_data.as_deref(),
            CanonicalField::VendorData => self.vendor_data.as_deref(),
            CanonicalField::NetworkConfig => self.network_config.as_deref(),
        }
    }

    pub(crate) fn field_mut(&mut self, field: CanonicalField) -> &mut Option<String> {
        match field {
            CanonicalField::UserData => &mut self.user_data,
            CanonicalField::VendorData => &mut self.vendor_data,
            CanonicalField::NetworkConfig => &mut self.network_config,
        }
    }

    /// Names of NIC devices, sorted
    pub fn nic_devices(&self) -> Vec<&str> {
        self.devices
            .iter()
            .flatten()
            .filter(|(_, device)| device.kind.as_deref() == Some("nic"))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Raw `user.meta-data` config value, meant to be overlaid on meta-data
    pub fn user_meta_data(&self) -> Option<&str> {
        self.config.get("user.meta-data").map(String::as_str)
    }

    /// `instance-id` from meta-data, which may be YAML or JSON
    pub fn instance_id(&self) -> Result<Option<String>> {
        let Some(raw) = self.meta_data.as_deref() else {
            return Ok(None);
        };
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| MetadataError::InvalidMetadata {
                kind: "meta-data".to_string(),
                reason: e.to_string(),
            })?;

        Ok(match parsed.get("instance-id") {
            Some(serde_yaml::Value::String(id)) => Some(id.clone()),
            Some(serde_yaml::Value::Number(id)) => Some(id.to_string()),
            _ => None,
        })
    }

    /// Copy with user-data, vendor-data and sensitive config values replaced
    pub fn redacted(&self) -> Self {
        let mut redacted = self.clone();
        for value in [&mut redacted.user_data, &mut redacted.vendor_data]
            .into_iter()
            .flatten()
        {
            *value = REDACTED.to_string();
        }
        for (key, value) in redacted.config.iter_mut() {
            if is_sensitive_key(key) {
                *value = REDACTED.to_string();
            }
        }
        redacted
    }
}
