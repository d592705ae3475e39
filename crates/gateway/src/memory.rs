//! In-memory gateway with scripted read faults.
//!
//! Used to exercise the transfer helpers against a remote that drops
//! connections, truncates streams or refuses to open.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::gateway::copy_capability;
use crate::{
    BoxedReader, BoxedWriter, Capabilities, Capability, FileSystemId, Gateway, GatewayError,
    GatewayFuture,
};

/// What the next `open_read` of a path does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFault {
    /// Stream ends cleanly after this many bytes.
    TruncateAt(usize),
    /// Connection reset after this many bytes.
    ResetAt(usize),
    /// Opening fails with a connection error.
    Refuse,
    /// Opening fails with an authentication error.
    Deny,
}

#[derive(Default)]
struct Store {
    files: BTreeMap<String, Vec<u8>>,
    faults: HashMap<String, VecDeque<ReadFault>>,
    opens: HashMap<String, usize>,
}

/// Gateway keeping files in a shared map. Clones share storage.
#[derive(Clone)]
pub struct MemoryGateway {
    name: String,
    capabilities: Capabilities,
    store: Arc<Mutex<Store>>,
}

impl MemoryGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities::all(),
            store: Arc::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.store()
            .files
            .insert(normalize(path).to_string(), content.into());
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.store().files.get(normalize(path)).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.store().files.keys().cloned().collect()
    }

    /// Queues faults for successive reads of `path`; once drained, reads
    /// succeed.
    pub fn inject(&self, path: &str, faults: impl IntoIterator<Item = ReadFault>) {
        self.store()
            .faults
            .entry(normalize(path).to_string())
            .or_default()
            .extend(faults);
    }

    /// Number of `open_read` calls made for `path`.
    pub fn open_count(&self, path: &str) -> usize {
        self.store().opens.get(normalize(path)).copied().unwrap_or(0)
    }

    fn open(&self, id: &FileSystemId) -> Result<MemoryReader, GatewayError> {
        let key = id.path().to_string();
        let mut store = self.store();
        *store.opens.entry(key.clone()).or_default() += 1;

        let fault = store.faults.get_mut(&key).and_then(VecDeque::pop_front);
        let data = store
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(id.clone()))?;

        let (limit, reset) = match fault {
            None => (data.len(), false),
            Some(ReadFault::TruncateAt(n)) => (n.min(data.len()), false),
            Some(ReadFault::ResetAt(n)) => (n.min(data.len()), true),
            Some(ReadFault::Refuse) => {
                return Err(GatewayError::Connection(format!("{} refused connection", self.name)));
            }
            Some(ReadFault::Deny) => {
                return Err(GatewayError::Auth(format!("{} rejected credentials", self.name)));
            }
        };
        Ok(MemoryReader {
            data,
            pos: 0,
            limit,
            reset,
        })
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/').trim_end_matches('/')
}

fn dir_prefix(id: &FileSystemId) -> String {
    format!("{}/", id.path())
}

struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
    limit: usize,
    reset: bool,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.limit {
            if self.reset && self.limit < self.data.len() {
                return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
            }
            return Poll::Ready(Ok(()));
        }
        let n = (self.limit - self.pos).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

struct MemoryWriter {
    store: Arc<Mutex<Store>>,
    key: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .files
            .entry(self.key.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Gateway for MemoryGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn size<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, u64> {
        Box::pin(async move {
            self.ensure(Capability::Read)?;
            self.store()
                .files
                .get(id.path())
                .map(|data| data.len() as u64)
                .ok_or_else(|| GatewayError::NotFound(id.clone()))
        })
    }

    fn open_read<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, BoxedReader> {
        Box::pin(async move {
            self.ensure(Capability::Read)?;
            let reader = self.open(id)?;
            Ok(Box::new(reader) as BoxedReader)
        })
    }

    fn create_write<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, BoxedWriter> {
        Box::pin(async move {
            self.ensure(Capability::Write)?;
            let key = id.path().to_string();
            self.store().files.insert(key.clone(), Vec::new());
            debug!(gateway = %self.name, path = %key, "created file");
            Ok(Box::new(MemoryWriter {
                store: Arc::clone(&self.store),
                key,
            }) as BoxedWriter)
        })
    }

    fn delete<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.ensure(Capability::Delete)?;
            let mut store = self.store();
            if id.is_directory() {
                let prefix = dir_prefix(id);
                let before = store.files.len();
                store.files.retain(|k, _| !k.starts_with(&prefix));
                if store.files.len() == before {
                    return Err(GatewayError::NotFound(id.clone()));
                }
            } else if store.files.remove(id.path()).is_none() {
                return Err(GatewayError::NotFound(id.clone()));
            }
            Ok(())
        })
    }

    fn copy<'a>(&'a self, src: &'a FileSystemId, dst: &'a FileSystemId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.ensure(copy_capability(src))?;
            let mut store = self.store();
            let moved = relocate(&store.files, src, dst)?;
            store.files.extend(moved);
            Ok(())
        })
    }

    fn rename<'a>(
        &'a self,
        src: &'a FileSystemId,
        dst: &'a FileSystemId,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.ensure(Capability::Move)?;
            let mut store = self.store();
            let moved = relocate(&store.files, src, dst)?;
            if src.is_directory() {
                let prefix = dir_prefix(src);
                store.files.retain(|k, _| !k.starts_with(&prefix));
            } else {
                store.files.remove(src.path());
            }
            store.files.extend(moved);
            Ok(())
        })
    }
}

/// Entries under `src` re-keyed under `dst`.
fn relocate(
    files: &BTreeMap<String, Vec<u8>>,
    src: &FileSystemId,
    dst: &FileSystemId,
) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
    let moved: Vec<_> = if src.is_directory() {
        let from = dir_prefix(src);
        let to = dir_prefix(dst);
        if to.starts_with(&from) {
            return Err(GatewayError::InvalidPath(format!(
                "cannot move {src} into itself ({dst})"
            )));
        }
        files
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&from)
                    .map(|rest| (format!("{to}{rest}"), v.clone()))
            })
            .collect()
    } else {
        files
            .get(src.path())
            .map(|v| (dst.path().to_string(), v.clone()))
            .into_iter()
            .collect()
    };
    if moved.is_empty() {
        return Err(GatewayError::NotFound(src.clone()));
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_all(gw: &MemoryGateway, path: &str) -> io::Result<Vec<u8>> {
        let mut reader = gw.open_read(&FileSystemId::file(path)).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn scripted_faults_apply_in_order() {
        let gw = MemoryGateway::new("mem");
        gw.insert("f.bin", b"0123456789".to_vec());
        gw.inject("f.bin", [ReadFault::TruncateAt(4), ReadFault::ResetAt(6)]);

        assert_eq!(read_all(&gw, "f.bin").await.unwrap(), b"0123");
        let err = read_all(&gw, "f.bin").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(read_all(&gw, "f.bin").await.unwrap(), b"0123456789");
        assert_eq!(gw.open_count("f.bin"), 3);
    }

    #[tokio::test]
    async fn open_faults_map_to_gateway_errors() {
        let gw = MemoryGateway::new("mem");
        gw.insert("f", b"x".to_vec());
        gw.inject("f", [ReadFault::Refuse, ReadFault::Deny]);
        let id = FileSystemId::file("f");

        assert!(matches!(gw.open_read(&id).await, Err(GatewayError::Connection(_))));
        assert!(matches!(gw.open_read(&id).await, Err(GatewayError::Auth(_))));
        assert!(gw.open_read(&id).await.is_ok());
    }

    #[tokio::test]
    async fn writer_replaces_content() {
        let gw = MemoryGateway::new("mem");
        gw.insert("out", b"stale".to_vec());
        let mut writer = gw.create_write(&FileSystemId::file("/out")).await.unwrap();
        assert_eq!(gw.contents("out").unwrap(), b"");
        writer.write_all(b"fresh").await.unwrap();
        assert_eq!(gw.contents("out").unwrap(), b"fresh");
        assert_eq!(gw.size(&FileSystemId::file("out")).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn directory_copy_rename_delete() {
        let gw = MemoryGateway::new("mem");
        gw.insert("music/a.flac", b"a".to_vec());
        gw.insert("music/live/b.flac", b"b".to_vec());
        gw.insert("musicals.txt", b"not in dir".to_vec());

        let music = FileSystemId::directory("music");
        let backup = FileSystemId::directory("backup");
        gw.copy(&music, &backup).await.unwrap();
        assert_eq!(gw.contents("backup/live/b.flac").unwrap(), b"b");
        assert!(gw.contents("backup/als.txt").is_none());

        gw.rename(&backup, &FileSystemId::directory("archive")).await.unwrap();
        assert!(gw.contents("backup/a.flac").is_none());
        assert_eq!(gw.contents("archive/a.flac").unwrap(), b"a");

        gw.delete(&music).await.unwrap();
        assert_eq!(
            gw.paths(),
            vec!["archive/a.flac", "archive/live/b.flac", "musicals.txt"]
        );
        assert!(matches!(gw.delete(&music).await, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn directory_cannot_land_in_own_subtree() {
        let gw = MemoryGateway::new("mem");
        gw.insert("a/f", b"x".to_vec());
        let a = FileSystemId::directory("a");

        for dst in ["a", "a/b"] {
            let dst = FileSystemId::directory(dst);
            assert!(matches!(gw.copy(&a, &dst).await, Err(GatewayError::InvalidPath(_))));
            assert!(matches!(gw.rename(&a, &dst).await, Err(GatewayError::InvalidPath(_))));
        }
        assert_eq!(gw.paths(), vec!["a/f"]);

        gw.copy(&a, &FileSystemId::directory("ab")).await.unwrap();
        assert_eq!(gw.contents("ab/f").unwrap(), b"x");
    }

    #[tokio::test]
    async fn copy_requires_matching_capability() {
        let gw = MemoryGateway::new("mem")
            .with_capabilities(Capabilities::empty().with(Capability::CopyFile));
        gw.insert("d/f", b"x".to_vec());

        gw.copy(&FileSystemId::file("d/f"), &FileSystemId::file("g"))
            .await
            .unwrap();
        let err = gw
            .copy(&FileSystemId::directory("d"), &FileSystemId::directory("e"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Unsupported {
                capability: Capability::CopyDirectory,
                ..
            }
        ));
        assert!(gw.contents("e/f").is_none());
    }
}
