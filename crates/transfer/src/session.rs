use std::future::Future;
use std::io::{self, Cursor};
use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::{RelayWriter, TransferError};

/// Boxed future returned by the session's collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces a fresh stream bound to the remote resource.
///
/// Called once per attempt; must be safe to call repeatedly. Errors are
/// classified with [`TransferError::is_transient`]: a connection failure is
/// retried, an authentication failure is not.
pub trait SourceFactory: Send {
    type Source: AsyncRead + Unpin + Send;

    fn open(&mut self) -> BoxFuture<'_, Result<Self::Source, TransferError>>;
}

impl<F, Fut, S> SourceFactory for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<S, TransferError>> + Send + 'static,
    S: AsyncRead + Unpin + Send,
{
    type Source = S;

    fn open(&mut self) -> BoxFuture<'_, Result<S, TransferError>> {
        Box::pin((self)())
    }
}

/// Rewinds a sink to the state of a freshly created one.
pub trait SinkReset<W>: Send {
    fn reset<'a>(&'a mut self, sink: &'a mut W) -> BoxFuture<'a, io::Result<()>>;
}

impl<W, F> SinkReset<W> for F
where
    F: FnMut(&mut W) -> io::Result<()> + Send,
{
    fn reset<'a>(&'a mut self, sink: &'a mut W) -> BoxFuture<'a, io::Result<()>> {
        let result = (self)(sink);
        Box::pin(std::future::ready(result))
    }
}

/// Sink reset for in-memory buffers.
pub fn clear_cursor(sink: &mut Cursor<Vec<u8>>) -> io::Result<()> {
    sink.get_mut().clear();
    sink.set_position(0);
    Ok(())
}

/// Sink reset for relay writers; the reader observes a rewind.
pub fn reset_relay(sink: &mut RelayWriter) -> io::Result<()> {
    sink.reset().map_err(io::Error::from)
}

/// Lifecycle of a session as driven by [`run_session`](crate::run_session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Transferring,
    /// A transient fault interrupted the copy; the sink is being reset.
    Faulted,
    /// Waiting out the backoff before re-opening the source.
    Resuming,
    Completed,
    ExhaustedRetries,
    /// A non-transient fault (including cancellation) ended the session.
    Aborted,
}

/// Binds a transfer's total length, chunk size, source factory and sink.
pub struct TransferSession<F, W, R> {
    pub(crate) total_length: u64,
    pub(crate) chunk_size: usize,
    pub(crate) source_factory: F,
    pub(crate) sink: W,
    pub(crate) reset_sink: R,
    pub(crate) cancel: CancellationToken,
    pub(crate) state: TransferState,
}

impl<F, W, R> TransferSession<F, W, R> {
    /// Creates a session. `chunk_size` must be non-zero.
    pub fn new(
        total_length: u64,
        chunk_size: usize,
        source_factory: F,
        sink: W,
        reset_sink: R,
    ) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidArgument(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            total_length,
            chunk_size,
            source_factory,
            sink,
            reset_sink,
            cancel: CancellationToken::new(),
            state: TransferState::Idle,
        })
    }

    /// Threads `cancel` through the session; it is checked at every chunk
    /// boundary and before every backoff wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_source() -> impl Future<Output = Result<&'static [u8], TransferError>> {
        std::future::ready(Ok(&b""[..]))
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let result = TransferSession::new(10, 0, empty_source, Cursor::new(Vec::<u8>::new()), clear_cursor);
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
    }

    #[test]
    fn new_session_is_idle() {
        let session =
            TransferSession::new(10, 4, empty_source, Cursor::new(Vec::<u8>::new()), clear_cursor)
                .unwrap();
        assert_eq!(session.state(), TransferState::Idle);
        assert_eq!(session.total_length(), 10);
        assert_eq!(session.chunk_size(), 4);
        assert!(!session.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn closure_factory_opens_fresh_sources() {
        let mut opens: u8 = 0;
        let mut factory = move || {
            opens += 1;
            let n = opens;
            async move { Ok::<_, TransferError>(Cursor::new(vec![n; 2])) }
        };
        let a = factory.open().await.unwrap();
        let b = factory.open().await.unwrap();
        assert_eq!(a.into_inner(), vec![1, 1]);
        assert_eq!(b.into_inner(), vec![2, 2]);
    }

    #[tokio::test]
    async fn cursor_reset_is_a_true_rewind() {
        let mut sink = Cursor::new(b"partial".to_vec());
        sink.set_position(7);
        let mut reset = clear_cursor;
        reset.reset(&mut sink).await.unwrap();
        assert!(sink.get_ref().is_empty());
        assert_eq!(sink.position(), 0);
    }

    #[tokio::test]
    async fn relay_reset_clears_pending_bytes() {
        use std::io::Write;

        let (mut writer, _reader) = crate::relay();
        writer.write_all(b"abc").unwrap();
        let mut reset = reset_relay;
        reset.reset(&mut writer).await.unwrap();
        assert_eq!(writer.total_bytes_written(), 0);
    }
}
