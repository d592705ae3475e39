use std::io::{self, Read, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

/// Minimum advance, in percentage points of the total, between two reports.
pub const PROGRESS_THRESHOLD_PERCENT: u64 = 5;

/// A point-in-time view of a transfer's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    /// `bytes_transferred * 100 / bytes_total` clamped to 0..=100, or 0 when
    /// the total is unknown.
    pub percent_completed: u8,
}

impl ProgressSample {
    pub fn new(bytes_transferred: u64, bytes_total: u64) -> Self {
        let percent_completed = if bytes_total > 0 {
            let pct = u128::from(bytes_transferred) * 100 / u128::from(bytes_total);
            pct.min(100) as u8
        } else {
            0
        };
        Self {
            bytes_transferred,
            bytes_total,
            percent_completed,
        }
    }
}

/// Receives progress samples.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, sample: ProgressSample);
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressSample) + Send + Sync,
{
    fn report(&self, sample: ProgressSample) {
        self(sample)
    }
}

// ---------------------------------------------------------------------------
// ProgressStream
// ---------------------------------------------------------------------------

/// Decorator that reports progress for every read or write on `S`.
///
/// The first transfer always reports. Later transfers report only once the
/// cumulative byte count advanced by more than
/// [`PROGRESS_THRESHOLD_PERCENT`] of the total since the previous report,
/// except that the transfer reaching the total always reports. Without a
/// reporter the stream is a plain pass-through.
pub struct ProgressStream<S> {
    inner: S,
    reporter: Option<Arc<dyn ProgressReporter>>,
    bytes_total: u64,
    transferred: u64,
    last_reported: Option<u64>,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, bytes_total: u64, reporter: Option<Arc<dyn ProgressReporter>>) -> Self {
        Self {
            inner,
            reporter,
            bytes_total,
            transferred: 0,
            last_reported: None,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Bytes counted so far (always 0 without a reporter).
    pub fn bytes_transferred(&self) -> u64 {
        self.transferred
    }

    /// Restarts the byte count at zero after the wrapped stream was rewound.
    ///
    /// Reports stay suppressed until the new count passes the last reported
    /// one, so `percent_completed` never decreases and samples never exceed
    /// what a single pass transfers.
    pub fn rebase(&mut self) {
        self.transferred = 0;
    }

    fn record(&mut self, n: usize) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if n == 0 {
            return;
        }

        self.transferred += n as u64;
        let due = match self.last_reported {
            None => true,
            Some(last) if self.transferred <= last => false,
            Some(last) => {
                let reached_total = self.bytes_total > 0
                    && self.transferred >= self.bytes_total
                    && last < self.bytes_total;
                let advanced = u128::from(self.transferred - last) * 100
                    > u128::from(PROGRESS_THRESHOLD_PERCENT) * u128::from(self.bytes_total);
                reached_total || advanced
            }
        };

        if due {
            self.last_reported = Some(self.transferred);
            reporter.report(ProgressSample::new(self.transferred, self.bytes_total));
        }
    }
}

impl<S: Read> Read for ProgressStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.record(n);
        Ok(n)
    }
}

impl<S: Write> Write for ProgressStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.record(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for ProgressStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ProgressStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.record(buf.filled().len() - before);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ProgressStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.record(n);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: AsyncSeek + Unpin> AsyncSeek for ProgressStream<S> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().inner).poll_complete(cx)
    }
}
