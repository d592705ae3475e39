use std::fmt;

/// Identifies a file or directory inside one gateway.
///
/// Paths are `/`-separated and relative to the gateway's root; a leading
/// `/` is tolerated and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileSystemId {
    File(String),
    Directory(String),
}

impl FileSystemId {
    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::Directory(path.into())
    }

    /// The path with any leading `/` and trailing `/` removed.
    pub fn path(&self) -> &str {
        match self {
            Self::File(p) | Self::Directory(p) => p.trim_start_matches('/').trim_end_matches('/'),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        let path = self.path();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Same kind of entry at another path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        match self {
            Self::File(_) => Self::File(path.into()),
            Self::Directory(_) => Self::Directory(path.into()),
        }
    }
}

impl fmt::Display for FileSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(_) => write!(f, "{}", self.path()),
            Self::Directory(_) => write!(f, "{}/", self.path()),
        }
    }
}
