use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use nimbus_transfer::{BoxFuture, SinkReset, SourceFactory, TransferError};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::{BoxedReader, BoxedWriter, FileSystemId, Gateway, GatewayError};

/// Opens a fresh read stream of one remote file per engine attempt.
#[derive(Clone)]
pub struct GatewaySourceFactory {
    gateway: Arc<dyn Gateway>,
    id: FileSystemId,
}

impl GatewaySourceFactory {
    pub fn new(gateway: Arc<dyn Gateway>, id: FileSystemId) -> Self {
        Self { gateway, id }
    }

    pub fn id(&self) -> &FileSystemId {
        &self.id
    }
}

impl SourceFactory for GatewaySourceFactory {
    type Source = BoxedReader;

    fn open(&mut self) -> BoxFuture<'_, Result<BoxedReader, TransferError>> {
        Box::pin(async move {
            debug!(gateway = self.gateway.name(), id = %self.id, "opening remote stream");
            self.gateway
                .open_read(&self.id)
                .await
                .map_err(TransferError::from)
        })
    }
}

/// Writer for one remote file that can be recreated from scratch.
pub struct GatewaySink {
    gateway: Arc<dyn Gateway>,
    id: FileSystemId,
    writer: BoxedWriter,
}

impl GatewaySink {
    /// Creates (or truncates) the remote file.
    pub async fn create(gateway: Arc<dyn Gateway>, id: FileSystemId) -> Result<Self, GatewayError> {
        let writer = gateway.create_write(&id).await?;
        Ok(Self { gateway, id, writer })
    }

    /// Discards everything written so far by recreating the remote file.
    pub async fn recreate(&mut self) -> Result<(), GatewayError> {
        self.writer = self.gateway.create_write(&self.id).await?;
        Ok(())
    }

    pub fn id(&self) -> &FileSystemId {
        &self.id
    }
}

impl AsyncWrite for GatewaySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// Sink reset for [`GatewaySink`]: recreates the remote file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecreateRemote;

impl SinkReset<GatewaySink> for RecreateRemote {
    fn reset<'a>(&'a mut self, sink: &'a mut GatewaySink) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            sink.recreate().await.map_err(|e| match e {
                GatewayError::Io(e) => e,
                other => io::Error::other(other),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryGateway, ReadFault};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn factory_opens_fresh_stream_each_time() {
        let mem = MemoryGateway::new("mem");
        mem.insert("f", b"abcdef".to_vec());
        mem.inject("f", [ReadFault::TruncateAt(2)]);
        let mut factory = GatewaySourceFactory::new(Arc::new(mem.clone()), FileSystemId::file("f"));

        let mut first = Vec::new();
        factory.open().await.unwrap().read_to_end(&mut first).await.unwrap();
        let mut second = Vec::new();
        factory.open().await.unwrap().read_to_end(&mut second).await.unwrap();

        assert_eq!(first, b"ab");
        assert_eq!(second, b"abcdef");
        assert_eq!(mem.open_count("f"), 2);
    }

    #[tokio::test]
    async fn factory_classifies_open_failures() {
        let mem = MemoryGateway::new("mem");
        mem.insert("f", b"x".to_vec());
        mem.inject("f", [ReadFault::Refuse, ReadFault::Deny]);
        let mut factory = GatewaySourceFactory::new(Arc::new(mem), FileSystemId::file("f"));

        let refused = factory.open().await.err().unwrap();
        assert!(refused.is_transient());
        let denied = factory.open().await.err().unwrap();
        assert!(matches!(denied, TransferError::Auth(_)));
        assert!(!denied.is_transient());
    }

    #[tokio::test]
    async fn recreate_discards_partial_upload() {
        let mem = MemoryGateway::new("mem");
        let gateway: Arc<dyn Gateway> = Arc::new(mem.clone());
        let mut sink = GatewaySink::create(gateway, FileSystemId::file("up.bin"))
            .await
            .unwrap();
        sink.write_all(b"partial").await.unwrap();
        assert_eq!(mem.contents("up.bin").unwrap(), b"partial");

        RecreateRemote.reset(&mut sink).await.unwrap();
        assert_eq!(mem.contents("up.bin").unwrap(), b"");
        sink.write_all(b"whole").await.unwrap();
        assert_eq!(mem.contents("up.bin").unwrap(), b"whole");
    }
}
