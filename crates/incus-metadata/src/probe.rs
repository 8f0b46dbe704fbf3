//! Platform detection
//!
//! The guest API is only usable when the provider exposes its socket inside
//! the instance. When the feature is disabled no socket file exists.

use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use tracing::debug;

/// Return true when `path` exists and is a Unix socket
///
/// Uses `lstat`, so a symlink pointing at a socket does not count.
pub fn is_platform_viable(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => true,
        Ok(_) => {
            debug!(path = %path.display(), "Guest API path exists but is not a socket");
            false
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Guest API socket not present");
            false
        }
    }
}
