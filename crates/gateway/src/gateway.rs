//! The gateway trait.
//!
//! Provider adapters (cloud drives, object stores, ...) implement
//! [`Gateway`]; the transfer helpers only ever talk to this trait. Methods
//! return boxed futures so the trait stays object-safe and gateways can be
//! stored as `Arc<dyn Gateway>` in the registry.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Capabilities, Capability, FileSystemId, GatewayError};

pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Stream over a remote file's bytes.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Stream writing a remote file from scratch.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// One storage account.
///
/// Operations outside [`capabilities`](Gateway::capabilities) fail with
/// [`GatewayError::Unsupported`] before touching storage.
pub trait Gateway: Send + Sync {
    /// Human-readable gateway name used in logs and errors.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Size in bytes of a file.
    fn size<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, u64>;

    /// Opens a fresh stream positioned at the start of a file.
    fn open_read<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, BoxedReader>;

    /// Creates (or truncates) a file and returns a writer for it.
    fn create_write<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, BoxedWriter>;

    /// Deletes a file, or a directory with everything below it.
    fn delete<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, ()>;

    /// Server-side copy. Directories copy recursively.
    fn copy<'a>(&'a self, src: &'a FileSystemId, dst: &'a FileSystemId) -> GatewayFuture<'a, ()>;

    /// Server-side move.
    fn rename<'a>(&'a self, src: &'a FileSystemId, dst: &'a FileSystemId)
    -> GatewayFuture<'a, ()>;

    /// Fails with [`GatewayError::Unsupported`] unless `capability` is supported.
    fn ensure(&self, capability: Capability) -> Result<(), GatewayError> {
        if self.capabilities().contains(capability) {
            Ok(())
        } else {
            Err(GatewayError::Unsupported {
                gateway: self.name().to_string(),
                capability,
            })
        }
    }
}

/// Capability needed to copy `src`.
pub(crate) fn copy_capability(src: &FileSystemId) -> Capability {
    if src.is_directory() {
        Capability::CopyDirectory
    } else {
        Capability::CopyFile
    }
}
