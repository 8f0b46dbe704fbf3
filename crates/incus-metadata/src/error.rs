//! Error types for guest API metadata reads

use std::path::PathBuf;
use thiserror::Error;

/// A data fragment whose content kind could not be classified as text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fragment {key}: {reason}")]
pub struct FragmentValidationError {
    /// Source key of the fragment (e.g. `user.vendor-data.extra`)
    pub key: String,
    /// Why the fragment was flagged
    pub reason: String,
}

impl FragmentValidationError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Error type for metadata operations
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Could not connect to the guest API socket
    #[error("failed to connect to {path}: {source}")]
    Transport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP exchange failed below the status-code level
    #[error("HTTP exchange for {route} failed: {source}")]
    Protocol {
        route: String,
        #[source]
        source: hyper::Error,
    },

    /// Request could not be built
    #[error("invalid request for {route}: {source}")]
    InvalidRequest {
        route: String,
        #[source]
        source: http::Error,
    },

    /// A required route answered with a non-success status
    #[error("invalid HTTP response [{status}] from {route}: {body}")]
    Http {
        status: u16,
        route: String,
        body: String,
    },

    /// A route expected to return JSON returned something else
    #[error("unable to process {url}, expected JSON but found: {body}")]
    Format { url: String, body: String },

    /// Fragment rejected during composite assembly
    #[error("composite payload rejected: {0}")]
    Fragment(#[from] FragmentValidationError),

    /// Meta-data could not be interpreted
    #[error("invalid {kind}: {reason}")]
    InvalidMetadata { kind: String, reason: String },
}

/// Result type for metadata operations
pub type Result<T> = std::result::Result<T, MetadataError>;
