use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use incus_metadata::{MetadataKeys, MetadataReader};
use tracing::{error, info};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Categories to read: `all`, `none`, or a comma list of meta-data, config, devices
    #[arg(long, default_value = "all")]
    pub keys: MetadataKeys,

    /// Mask user-data, vendor-data and sensitive config values
    #[arg(long, default_value_t = false)]
    pub redact: bool,
}

pub async fn run(reader: &MetadataReader, args: QueryArgs) -> Result<bool> {
    let socket = reader.config().socket_path();
    if !reader.is_viable() {
        error!(socket = %socket.display(), "Incus guest API socket not found");
        println!("Status: Not available");
        return Ok(false);
    }

    let bundle = reader
        .read(args.keys)
        .await
        .wrap_err_with(|| format!("Failed to read metadata from {}", socket.display()))?;
    let bundle = if args.redact { bundle.redacted() } else { bundle };
    info!(config_keys = bundle.config.len(), "Metadata read");

    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(true)
}
