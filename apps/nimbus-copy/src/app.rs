use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use nimbus_gateway::{ConnectionRegistry, FileSystemId, LocalGateway, TransferOptions};
use nimbus_transfer::{ProgressSample, RelayError, RelayReader, TransferConfig, TransferSummary};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Cli;

const SOURCE_ACCOUNT: &str = "source";
const DESTINATION_ACCOUNT: &str = "destination";

/// Buffer used by the blocking consumer.
const DRAIN_BUFFER_SIZE: usize = 64 * 1024;

pub async fn run(cli: Cli) -> anyhow::Result<TransferSummary> {
    let config = match &cli.config {
        Some(path) => TransferConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => TransferConfig::default(),
    };
    info!(
        chunk_size = config.chunk_size,
        max_attempts = config.retry.max_attempts,
        "configuration loaded"
    );

    let destination = Arc::new(LocalGateway::new(DESTINATION_ACCOUNT, &cli.dst_root));
    let registry = ConnectionRegistry::new();
    registry
        .register(SOURCE_ACCOUNT, Arc::new(LocalGateway::new(SOURCE_ACCOUNT, &cli.src_root)))
        .await;
    registry
        .register(DESTINATION_ACCOUNT, destination.clone())
        .await;

    let target = destination.resolve(&FileSystemId::file(cli.dst_path.as_str()))?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling transfer");
            on_interrupt.cancel();
        }
    });

    let options = TransferOptions::new(config)
        .with_cancellation(cancel)
        .with_reporter(Arc::new(|sample: ProgressSample| {
            info!(
                bytes = sample.bytes_transferred,
                total = sample.bytes_total,
                percent = sample.percent_completed,
                "progress"
            );
        }));

    let source = registry.get(SOURCE_ACCOUNT).await?;
    let (reader, engine) = nimbus_gateway::download_to_relay(
        source,
        &FileSystemId::file(cli.src_path.as_str()),
        &options,
    )
    .await
    .with_context(|| format!("opening {}", cli.src_path))?;

    let consumer_target = target.clone();
    let consumer = tokio::task::spawn_blocking(move || drain_relay(reader, &consumer_target));

    let outcome = engine.await?;
    let drained = consumer.await?;
    registry.clear().await;

    let summary = match (outcome, drained) {
        (Ok(summary), Ok(written)) if written == summary.bytes_transferred => summary,
        (Ok(summary), Ok(written)) => {
            discard(&target);
            bail!(
                "wrote {written} bytes but transferred {}",
                summary.bytes_transferred
            );
        }
        (Err(e), _) => {
            discard(&target);
            return Err(e).with_context(|| format!("copying {}", cli.src_path));
        }
        (Ok(_), Err(e)) => {
            discard(&target);
            return Err(e);
        }
    };
    Ok(summary)
}

/// Writes everything read from `reader` to `path`, starting over whenever
/// the producer rewinds. Fails if the relay ends without completing.
pub fn drain_relay(mut reader: RelayReader, path: &Path) -> anyhow::Result<u64> {
    let written = drain_into_file(&mut reader, path)?;
    if !reader.is_completed() {
        bail!("transfer ended before completion");
    }
    Ok(written)
}

fn drain_into_file(reader: &mut impl Read, path: &Path) -> anyhow::Result<u64> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut buf = vec![0u8; DRAIN_BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                out.write_all(&buf[..n])?;
                written += n as u64;
            }
            Err(e) if matches!(RelayError::from_io(&e), Some(RelayError::Rewound)) => {
                out.flush()?;
                let file = out.get_mut();
                file.set_len(0)?;
                file.rewind()?;
                debug!(discarded = written, "relay rewound, restarting output");
                written = 0;
            }
            Err(e) => return Err(e.into()),
        }
    }

    out.flush()?;
    Ok(written)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove partial file");
    }
}
