use incus_metadata::MetadataReader;
use tracing::debug;

/// Print whether the guest API is reachable; true when it is
pub fn run(reader: &MetadataReader) -> bool {
    let config = reader.config();
    if reader.is_viable() {
        println!("Status: Available");
        println!("Platform: {}", config.subplatform());
        true
    } else {
        debug!(socket = %config.socket_path().display(), "Guest API socket not usable");
        println!("Status: Not available");
        println!("Socket: {}", config.socket_path().display());
        false
    }
}
