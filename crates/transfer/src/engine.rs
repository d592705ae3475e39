//! Retry-and-resume copy loop.
//!
//! A session moves through
//! `Idle → Transferring → (Faulted → Resuming → Transferring)* → Completed`
//! and ends in `ExhaustedRetries` or `Aborted` when it cannot complete.
//! Faults reset the whole sink: the engine never splices a sink mid-stream,
//! every retry re-reads from offset 0 through a freshly opened source.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{RetryContext, SinkReset, SourceFactory, TransferError, TransferSession, TransferState};

/// Outcome of a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub bytes_transferred: u64,
    /// Retries consumed from the session budget.
    pub retries: u32,
}

/// Copies `session.total_length()` bytes from the source factory to the sink.
///
/// Transient faults dispose the current source, reset the sink, wait the
/// backoff for the next attempt and start over from offset 0. Once
/// `retry.max_attempts()` retries are used up the session fails with
/// [`TransferError::ExhaustedRetries`] carrying the last fault. Non-transient
/// faults and cancellation propagate immediately.
///
/// On success the sink has been flushed, which completes a relay sink.
pub async fn run_session<F, W, R>(
    session: &mut TransferSession<F, W, R>,
    retry: &mut RetryContext,
) -> Result<TransferSummary, TransferError>
where
    F: SourceFactory,
    W: AsyncWrite + Unpin + Send,
    R: SinkReset<W>,
{
    let total = session.total_length;
    let buf_len = usize::try_from(total)
        .unwrap_or(usize::MAX)
        .min(session.chunk_size);
    let mut buf = vec![0u8; buf_len];

    debug!(
        total_length = total,
        chunk_size = session.chunk_size,
        max_attempts = retry.max_attempts(),
        "transfer session starting"
    );

    loop {
        session.state = TransferState::Transferring;

        let fault = match copy_attempt(session, &mut buf).await {
            Ok(()) => {
                session.state = TransferState::Completed;
                debug!(
                    bytes = total,
                    retries = retry.attempt(),
                    "transfer session completed"
                );
                return Ok(TransferSummary {
                    bytes_transferred: total,
                    retries: retry.attempt(),
                });
            }
            Err(e) if !e.is_transient() => {
                session.state = TransferState::Aborted;
                debug!(error = %e, "transfer session aborted");
                return Err(e);
            }
            Err(e) => e,
        };

        session.state = TransferState::Faulted;
        warn!(
            attempt = retry.attempt(),
            max_attempts = retry.max_attempts(),
            error = %fault,
            "transient transfer fault"
        );

        if let Err(e) = session.reset_sink.reset(&mut session.sink).await {
            session.state = TransferState::Aborted;
            warn!(error = %e, "sink reset failed");
            return Err(TransferError::Io(e));
        }

        if !retry.next_attempt() {
            session.state = TransferState::ExhaustedRetries;
            warn!(
                retries = retry.max_attempts(),
                "retry budget exhausted"
            );
            return Err(TransferError::ExhaustedRetries {
                retries: retry.max_attempts(),
                source: Box::new(fault),
            });
        }

        session.state = TransferState::Resuming;
        let delay = retry.backoff_for_attempt(retry.attempt());
        info!(
            attempt = retry.attempt(),
            delay_ms = delay.as_millis() as u64,
            "resuming transfer from offset 0"
        );

        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => {
                session.state = TransferState::Aborted;
                debug!("transfer cancelled during backoff");
                return Err(TransferError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One pass over the full length with a freshly opened source.
///
/// The source is dropped when this returns, on success and on fault.
async fn copy_attempt<F, W, R>(
    session: &mut TransferSession<F, W, R>,
    buf: &mut [u8],
) -> Result<(), TransferError>
where
    F: SourceFactory,
    W: AsyncWrite + Unpin + Send,
{
    if session.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let mut source = tokio::select! {
        biased;
        _ = session.cancel.cancelled() => return Err(TransferError::Cancelled),
        result = session.source_factory.open() => result?,
    };

    let total = session.total_length;
    let mut offset: u64 = 0;
    while offset < total {
        if session.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let want = (total - offset).min(buf.len() as u64) as usize;
        let chunk = &mut buf[..want];

        let filled = fill_chunk(&mut source, chunk, &session.cancel).await?;
        if filled < want {
            return Err(TransferError::Truncated {
                offset: offset + filled as u64,
                expected: total,
            });
        }

        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = session.sink.write_all(chunk) => result?,
        }
        offset += want as u64;
        trace!(offset, total, "chunk copied");
    }

    session.sink.flush().await?;
    Ok(())
}

/// Reads until `chunk` is full or the source reports end of stream.
async fn fill_chunk<S>(
    source: &mut S,
    chunk: &mut [u8],
    cancel: &CancellationToken,
) -> Result<usize, TransferError>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < chunk.len() {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = source.read(&mut chunk[filled..]) => result?,
        };
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
