//! nimbus-copy entry point.

mod app;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Copy a file between two storage roots, resuming over transient faults.
#[derive(Debug, Parser)]
#[command(name = "nimbus-copy", version, about)]
pub struct Cli {
    /// Root directory of the source account
    pub src_root: PathBuf,

    /// File to copy, relative to the source root
    pub src_path: String,

    /// Root directory of the destination account
    pub dst_root: PathBuf,

    /// Destination file, relative to the destination root
    pub dst_path: String,

    /// Transfer configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), ?cli, "starting nimbus-copy");

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(cli))?;

    tracing::info!(
        bytes = summary.bytes_transferred,
        retries = summary.retries,
        "copy complete"
    );
    Ok(())
}
