//! Single-producer/single-consumer byte relay.
//!
//! [`relay`] returns a writer half and a reader half sharing one chunk
//! queue. Writes never block; reads block the calling thread until the
//! requested count is available or the writer has completed (or been
//! dropped). Each half is owned by exactly one party, so the queue can never
//! have more than one producer or consumer.
//!
//! The relay is forward-only and untimed: seeking, positioning and timeouts
//! fail with [`RelayError::Unsupported`].

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::trace;

/// Errors produced by relay misuse or unsupported access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The writer reset the relay after the reader consumed data. Everything
    /// read so far is void; the content restarts at offset 0.
    #[error("relay was reset, content restarts at offset 0")]
    Rewound,
}

impl RelayError {
    /// Extracts a relay error carried inside an [`io::Error`].
    pub fn from_io(e: &io::Error) -> Option<&RelayError> {
        e.get_ref().and_then(|inner| inner.downcast_ref::<RelayError>())
    }
}

impl From<RelayError> for io::Error {
    fn from(e: RelayError) -> Self {
        let kind = match &e {
            RelayError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            RelayError::Unsupported(_) => io::ErrorKind::Unsupported,
            RelayError::InvalidState(_) | RelayError::Rewound => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Closed {
    #[default]
    Open,
    /// `complete`/`flush` was called.
    Completed,
    /// The writer was dropped without completing.
    Disposed,
}

#[derive(Debug, Default)]
struct RelayState {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes already consumed from `chunks.front()`.
    head_offset: usize,
    total_written: u64,
    /// Bytes handed to the reader since the last reset.
    delivered: u64,
    closed: Closed,
    reader_dropped: bool,
    rewound: bool,
}

impl RelayState {
    /// Moves queued bytes into `dst` in write order, returning the count.
    fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let mut n = 0;
        while n < dst.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let front_len = front.len();
            let available = &front[self.head_offset..];
            let take = available.len().min(dst.len() - n);
            dst[n..n + take].copy_from_slice(&available[..take]);
            n += take;
            self.head_offset += take;
            if self.head_offset == front_len {
                self.chunks.pop_front();
                self.head_offset = 0;
            }
        }
        self.delivered += n as u64;
        n
    }

    fn length(&self) -> Result<u64, RelayError> {
        match self.closed {
            Closed::Completed => Ok(self.total_written),
            Closed::Open | Closed::Disposed => Err(RelayError::Unsupported(
                "length is undefined until the relay is completed",
            )),
        }
    }
}

struct Shared {
    state: Mutex<RelayState>,
    data_ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected writer/reader pair.
pub fn relay() -> (RelayWriter, RelayReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(RelayState::default()),
        data_ready: Condvar::new(),
    });
    (
        RelayWriter {
            shared: Arc::clone(&shared),
        },
        RelayReader { shared },
    )
}

fn validate_range(len: usize, offset: usize, count: usize) -> Result<(), RelayError> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(RelayError::InvalidArgument(format!(
            "range {offset}+{count} exceeds buffer of {len} bytes"
        ))),
    }
}

// ---------------------------------------------------------------------------
// RelayWriter
// ---------------------------------------------------------------------------

/// Producer half of a relay.
///
/// Dropping the writer without calling [`complete`](Self::complete) releases
/// the reader with end-of-stream semantics.
pub struct RelayWriter {
    shared: Arc<Shared>,
}

impl RelayWriter {
    /// Enqueues `buf[offset..offset + count]` as one chunk.
    ///
    /// Never blocks. A zero-length write is a no-op once the range is valid.
    pub fn write_range(
        &mut self,
        buf: &[u8],
        offset: usize,
        count: usize,
    ) -> Result<(), RelayError> {
        validate_range(buf.len(), offset, count)?;

        let mut s = self.shared.lock();
        if s.closed != Closed::Open {
            return Err(RelayError::InvalidState(
                "relay is completed, no further writes".into(),
            ));
        }
        if s.reader_dropped {
            return Err(RelayError::InvalidState("relay reader was disposed".into()));
        }
        if count == 0 {
            return Ok(());
        }

        s.chunks.push_back(buf[offset..offset + count].to_vec());
        s.total_written += count as u64;
        drop(s);
        self.shared.data_ready.notify_one();
        Ok(())
    }

    /// Closes the queue for further writes. Idempotent.
    pub fn complete(&mut self) {
        let mut s = self.shared.lock();
        if s.closed == Closed::Open {
            s.closed = Closed::Completed;
            trace!(total_written = s.total_written, "relay completed");
        }
        drop(s);
        self.shared.data_ready.notify_all();
    }

    /// Discards all queued bytes and restarts the relay at offset 0.
    ///
    /// If the reader already consumed bytes since the previous reset, its
    /// next read fails once with [`RelayError::Rewound`] before any new data
    /// is delivered, so old and new content for the same range never mix.
    pub fn reset(&mut self) -> Result<(), RelayError> {
        let mut s = self.shared.lock();
        if s.closed != Closed::Open {
            return Err(RelayError::InvalidState(
                "cannot reset a completed relay".into(),
            ));
        }
        if s.reader_dropped {
            return Err(RelayError::InvalidState("relay reader was disposed".into()));
        }

        s.chunks.clear();
        s.head_offset = 0;
        s.total_written = 0;
        if s.delivered > 0 {
            s.rewound = true;
        }
        s.delivered = 0;
        trace!(rewound = s.rewound, "relay reset");
        drop(s);
        self.shared.data_ready.notify_all();
        Ok(())
    }

    /// Total bytes accepted since creation or the last reset.
    pub fn total_bytes_written(&self) -> u64 {
        self.shared.lock().total_written
    }

    /// Total length; defined only after completion.
    pub fn length(&self) -> Result<u64, RelayError> {
        self.shared.lock().length()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().closed == Closed::Completed
    }

    pub fn position(&self) -> Result<u64, RelayError> {
        Err(RelayError::Unsupported("position"))
    }

    pub fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), RelayError> {
        Err(RelayError::Unsupported("timeouts"))
    }
}

impl Drop for RelayWriter {
    fn drop(&mut self) {
        let mut s = self.shared.lock();
        if s.closed == Closed::Open {
            s.closed = Closed::Disposed;
        }
        drop(s);
        self.shared.data_ready.notify_all();
    }
}

impl Write for RelayWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_range(buf, 0, buf.len())?;
        Ok(buf.len())
    }

    /// Flushing a relay completes it.
    fn flush(&mut self) -> io::Result<()> {
        self.complete();
        Ok(())
    }
}

impl Seek for RelayWriter {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(RelayError::Unsupported("seek").into())
    }
}

impl AsyncWrite for RelayWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Write::write(self.get_mut(), buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Write::flush(self.get_mut()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().complete();
        Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// RelayReader
// ---------------------------------------------------------------------------

/// Consumer half of a relay.
pub struct RelayReader {
    shared: Arc<Shared>,
}

impl RelayReader {
    /// Reads up to `count` bytes into `buf[offset..]`.
    ///
    /// Blocks until `count` bytes were copied or the writer has completed
    /// or been dropped; in the latter case returns what was copied (0 means
    /// end of stream). A zero `count` returns immediately.
    pub fn read_range(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        count: usize,
    ) -> Result<usize, RelayError> {
        validate_range(buf.len(), offset, count)?;
        if count == 0 {
            return Ok(0);
        }

        let dst = &mut buf[offset..offset + count];
        let mut copied = 0;
        let mut s = self.shared.lock();
        loop {
            if s.rewound {
                if copied > 0 {
                    return Ok(copied);
                }
                s.rewound = false;
                return Err(RelayError::Rewound);
            }

            copied += s.drain_into(&mut dst[copied..]);
            if copied == count || s.closed != Closed::Open {
                return Ok(copied);
            }

            s = self
                .shared
                .data_ready
                .wait(s)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Total length; defined only after the writer completed.
    pub fn length(&self) -> Result<u64, RelayError> {
        self.shared.lock().length()
    }

    /// Returns `true` if the writer completed explicitly (as opposed to
    /// being dropped mid-stream).
    pub fn is_completed(&self) -> bool {
        self.shared.lock().closed == Closed::Completed
    }

    pub fn position(&self) -> Result<u64, RelayError> {
        Err(RelayError::Unsupported("position"))
    }

    pub fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), RelayError> {
        Err(RelayError::Unsupported("timeouts"))
    }
}

impl Drop for RelayReader {
    fn drop(&mut self) {
        let mut s = self.shared.lock();
        s.reader_dropped = true;
        s.chunks.clear();
        s.head_offset = 0;
    }
}

impl Read for RelayReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_range(buf, 0, len)?)
    }
}

impl Seek for RelayReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(RelayError::Unsupported("seek").into())
    }
}
