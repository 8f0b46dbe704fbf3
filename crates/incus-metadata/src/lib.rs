//! Incus guest API metadata client
//!
//! This crate reads instance configuration from the Incus guest API, which
//! is exposed inside the instance as HTTP/1.1 over the Unix socket
//! `/dev/incus/sock`. It is meant to run during early boot and assembles a
//! [`MetadataBundle`] holding meta-data, user-data, vendor-data, network
//! configuration, devices and the remaining raw config keys.
//!
//! # Overview
//!
//! - [`is_platform_viable`] checks that the socket exists and is a socket
//! - [`SocketTransport`] / [`Session`] speak HTTP over the socket
//! - [`RequestExecutor`] retries GETs while the server answers HTTP 500
//! - [`ConfigPromoter`] walks `config` routes and promotes aliased keys
//! - [`PayloadAssembler`] merges several fragments into one multi-part payload
//! - [`MetadataReader`] ties everything together
//!
//! # Example
//!
//! ```no_run
//! use incus_metadata::{MetadataConfig, MetadataKeys, MetadataReader};
//!
//! # async fn example() -> incus_metadata::Result<()> {
//! let reader = MetadataReader::new(MetadataConfig::default());
//! if reader.is_viable() {
//!     let bundle = reader.read(MetadataKeys::ALL).await?;
//!     println!("{:?}", bundle.user_data);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Routes
//!
//! All routes live under the API version prefix (`/1.0`):
//!
//! - `/meta-data` - required whenever meta-data is requested
//! - `/config` - JSON list of config routes, each readable on its own
//! - `/devices` - JSON object of devices, optional on older providers

pub mod config;
pub mod error;
pub mod payload;
pub mod probe;
pub mod promote;
pub mod reader;
pub mod request;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_server;

pub use config::{AliasTable, FragmentPolicy, MetadataConfig, RetryPolicy};
pub use error::{FragmentValidationError, MetadataError, Result};
pub use payload::{CompositePayload, PayloadAssembler, PayloadFragment, MERGE_TYPE};
pub use probe::is_platform_viable;
pub use promote::{ConfigPromoter, PromotedConfig};
pub use reader::MetadataReader;
pub use request::RequestExecutor;
pub use transport::{RouteResponse, Session, SocketTransport};
pub use types::{CanonicalField, DeviceDescriptor, MetadataBundle, MetadataKey, MetadataKeys};
