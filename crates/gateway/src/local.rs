use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::gateway::copy_capability;
use crate::{
    BoxedReader, BoxedWriter, Capabilities, Capability, FileSystemId, Gateway, GatewayError,
    GatewayFuture, validate_relative_path,
};

/// Gateway over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalGateway {
    name: String,
    root: PathBuf,
    capabilities: Capabilities,
}

impl LocalGateway {
    /// A gateway rooted at `root` supporting every capability.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            capabilities: Capabilities::all(),
        }
    }

    /// Restricts the gateway, e.g. to model a read-only share.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an id to a path under the root, rejecting traversal.
    pub fn resolve(&self, id: &FileSystemId) -> Result<PathBuf, GatewayError> {
        let relative = id.path();
        validate_relative_path(relative)?;
        Ok(self.root.join(relative))
    }

    async fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
        while let Some((from, to)) = pending.pop() {
            tokio::fs::create_dir_all(&to).await?;
            let mut entries = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                let target = to.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    tokio::fs::copy(entry.path(), &target).await?;
                }
            }
        }
        Ok(())
    }
}

fn map_io(id: &FileSystemId, e: io::Error) -> GatewayError {
    if e.kind() == io::ErrorKind::NotFound {
        GatewayError::NotFound(id.clone())
    } else {
        GatewayError::Io(e)
    }
}

async fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

impl Gateway for LocalGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn size<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, u64> {
        Box::pin(async move {
            self.ensure(Capability::Read)?;
            let path = self.resolve(id)?;
            let meta = tokio::fs::metadata(&path).await.map_err(|e| map_io(id, e))?;
            if meta.is_dir() {
                return Err(GatewayError::InvalidPath(format!("{id} is a directory")));
            }
            Ok(meta.len())
        })
    }

    fn open_read<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, BoxedReader> {
        Box::pin(async move {
            self.ensure(Capability::Read)?;
            let path = self.resolve(id)?;
            let file = tokio::fs::File::open(&path).await.map_err(|e| map_io(id, e))?;
            Ok(Box::new(file) as BoxedReader)
        })
    }

    fn create_write<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, BoxedWriter> {
        Box::pin(async move {
            self.ensure(Capability::Write)?;
            let path = self.resolve(id)?;
            create_parent(&path).await?;
            let file = tokio::fs::File::create(&path).await?;
            debug!(gateway = %self.name, path = %path.display(), "created file");
            Ok(Box::new(file) as BoxedWriter)
        })
    }

    fn delete<'a>(&'a self, id: &'a FileSystemId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.ensure(Capability::Delete)?;
            let path = self.resolve(id)?;
            let result = if id.is_directory() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| map_io(id, e))
        })
    }

    fn copy<'a>(&'a self, src: &'a FileSystemId, dst: &'a FileSystemId) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.ensure(copy_capability(src))?;
            let from = self.resolve(src)?;
            let to = self.resolve(dst)?;
            if src.is_directory() && to.starts_with(&from) {
                return Err(GatewayError::InvalidPath(format!(
                    "cannot copy {src} into itself ({dst})"
                )));
            }
            if !tokio::fs::try_exists(&from).await? {
                return Err(GatewayError::NotFound(src.clone()));
            }
            if src.is_directory() {
                self.copy_tree(&from, &to).await?;
            } else {
                create_parent(&to).await?;
                tokio::fs::copy(&from, &to).await.map_err(|e| map_io(src, e))?;
            }
            debug!(gateway = %self.name, %src, %dst, "copied");
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
            let from = self.resolve(src)?;
            let to = self.resolve(dst)?;
            create_parent(&to).await?;
            tokio::fs::rename(&from, &to).await.map_err(|e| map_io(src, e))
        })
    }
}
