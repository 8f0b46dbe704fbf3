// Command-line front end for the Incus guest API metadata client
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use incus_metadata::config::{DEFAULT_API_VERSION, DEFAULT_SOCKET_PATH};
use incus_metadata::{MetadataConfig, MetadataReader};
use std::io::stderr;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod cmd;

#[derive(Parser, Debug)]
#[command(author, version, about = "Incus guest API metadata client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Guest API socket
    #[arg(long, env = "INCUS_SOCKET", default_value = DEFAULT_SOCKET_PATH, global = true)]
    socket: PathBuf,

    /// Guest API version prefix
    #[arg(long, env = "INCUS_API_VERSION", default_value = DEFAULT_API_VERSION, global = true)]
    api_version: String,

    /// Verbose output - shows request-level logs
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reports whether the guest API socket is available.
    Detect,
    /// Reads instance metadata and prints it as JSON.
    Query(cmd::query::QueryArgs),
    /// Succeeds when the instance id still matches.
    CheckInstance(cmd::check::CheckArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable; RUST_LOG overrides
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let default_directives = format!(
        "incus_guestapi={level},incus_metadata={level},hyper=warn",
        level = default_level
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    let config = MetadataConfig::default()
        .with_socket_path(&cli.socket)
        .with_api_version(cli.api_version.as_str());
    debug!(socket = %cli.socket.display(), api_version = %cli.api_version, "Using guest API");
    let reader = MetadataReader::new(config);

    let success = match cli.command {
        Commands::Detect => cmd::detect::run(&reader),
        Commands::Query(args) => cmd::query::run(&reader, args).await?,
        Commands::CheckInstance(args) => cmd::check::run(&reader, args).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
