use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use incus_metadata::MetadataReader;
use tracing::error;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Instance id recorded on a previous boot
    pub instance_id: String,
}

pub async fn run(reader: &MetadataReader, args: CheckArgs) -> Result<bool> {
    if !reader.is_viable() {
        error!(
            socket = %reader.config().socket_path().display(),
            "Incus guest API socket not found"
        );
        println!("Status: Not available");
        return Ok(false);
    }

    let matches = reader
        .check_instance_id(&args.instance_id)
        .await
        .wrap_err("Failed to read instance id")?;
    if matches {
        println!("Instance: unchanged ({})", args.instance_id);
    } else {
        println!("Instance: changed (expected {})", args.instance_id);
    }
    Ok(matches)
}
