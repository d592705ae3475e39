//! Transfers between gateways and local sinks through the retrying engine.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nimbus_transfer::{
    BoxFuture, ProgressReporter, ProgressStream, RelayReader, SinkReset, TransferConfig,
    TransferError, TransferSession, TransferSummary, relay, reset_relay, run_session,
};
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    Capability, FileSystemId, Gateway, GatewayError, GatewaySink, GatewaySourceFactory,
    RecreateRemote,
};

/// Settings shared by the transfer helpers.
#[derive(Clone, Default)]
pub struct TransferOptions {
    pub config: TransferConfig,
    pub cancel: CancellationToken,
    pub reporter: Option<Arc<dyn ProgressReporter>>,
}

impl TransferOptions {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

/// Resets the sink underneath a progress decorator and rebases its count,
/// so a retried pass is not reported on top of the abandoned one.
struct ResetInner<R>(R);

impl<W, R> SinkReset<ProgressStream<W>> for ResetInner<R>
where
    W: Send,
    R: SinkReset<W>,
{
    fn reset<'a>(&'a mut self, sink: &'a mut ProgressStream<W>) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.0.reset(sink.get_mut()).await?;
            sink.rebase();
            Ok(())
        })
    }
}

async fn run<F, W, R>(
    total: u64,
    factory: F,
    sink: W,
    reset: R,
    options: &TransferOptions,
) -> Result<(TransferSummary, W), GatewayError>
where
    F: nimbus_transfer::SourceFactory,
    W: AsyncWrite + Unpin + Send,
    R: SinkReset<W>,
{
    let sink = ProgressStream::new(sink, total, options.reporter.clone());
    let mut session =
        TransferSession::new(total, options.config.chunk_size, factory, sink, ResetInner(reset))?
            .with_cancellation(options.cancel.clone());
    let mut retry = options.config.retry.context();
    let summary = run_session(&mut session, &mut retry).await?;
    Ok((summary, session.into_sink().into_inner()))
}

/// Downloads a remote file into `sink`, calling `reset` to rewind the sink
/// whenever the engine restarts the copy. Returns the sink on success.
pub async fn download<W, R>(
    gateway: Arc<dyn Gateway>,
    id: &FileSystemId,
    sink: W,
    reset: R,
    options: &TransferOptions,
) -> Result<(TransferSummary, W), GatewayError>
where
    W: AsyncWrite + Unpin + Send,
    R: SinkReset<W>,
{
    gateway.ensure(Capability::Read)?;
    let total = gateway.size(id).await?;
    info!(gateway = gateway.name(), %id, total, "download starting");

    let factory = GatewaySourceFactory::new(Arc::clone(&gateway), id.clone());
    let (summary, sink) = run(total, factory, sink, reset, options).await?;
    info!(
        gateway = gateway.name(),
        %id,
        bytes = summary.bytes_transferred,
        retries = summary.retries,
        "download finished"
    );
    Ok((summary, sink))
}

/// Starts a download into a relay and returns its reader for a blocking
/// consumer, together with the task driving the engine.
///
/// The size lookup happens before returning, so a missing file fails here.
/// If the engine gives up, the relay ends without completing; consumers
/// check [`RelayReader::is_completed`] after reaching end of stream.
pub async fn download_to_relay(
    gateway: Arc<dyn Gateway>,
    id: &FileSystemId,
    options: &TransferOptions,
) -> Result<(RelayReader, JoinHandle<Result<TransferSummary, GatewayError>>), GatewayError> {
    gateway.ensure(Capability::Read)?;
    let total = gateway.size(id).await?;
    info!(gateway = gateway.name(), %id, total, "relay download starting");

    let (writer, reader) = relay();
    let factory = GatewaySourceFactory::new(gateway, id.clone());
    let options = options.clone();
    let task = tokio::spawn(async move {
        let (summary, _writer) = run(total, factory, writer, reset_relay, &options).await?;
        Ok(summary)
    });
    Ok((reader, task))
}

/// Uploads a local file to `id`, recreating the remote file on every retry.
pub async fn upload(
    local: &Path,
    gateway: Arc<dyn Gateway>,
    id: &FileSystemId,
    options: &TransferOptions,
) -> Result<TransferSummary, GatewayError> {
    gateway.ensure(Capability::Write)?;
    let total = tokio::fs::metadata(local).await?.len();
    info!(gateway = gateway.name(), %id, total, "upload starting");

    let path: PathBuf = local.to_path_buf();
    let factory = move || {
        let path = path.clone();
        async move { tokio::fs::File::open(&path).await.map_err(TransferError::from) }
    };
    let sink = GatewaySink::create(Arc::clone(&gateway), id.clone()).await?;
    let (summary, _sink) = run(total, factory, sink, RecreateRemote, options).await?;
    info!(
        gateway = gateway.name(),
        %id,
        bytes = summary.bytes_transferred,
        retries = summary.retries,
        "upload finished"
    );
    Ok(summary)
}
