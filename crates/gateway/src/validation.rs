use std::path::{Component, Path};

use crate::GatewayError;

/// Checks that `path` stays inside the directory it will be joined onto.
///
/// Empty paths, absolute paths, `..` segments and Windows drive or UNC
/// prefixes are rejected.
pub fn validate_relative_path(path: &str) -> Result<(), GatewayError> {
    if path.is_empty() {
        return Err(GatewayError::InvalidPath("empty path".into()));
    }

    let reason = Path::new(path).components().find_map(|c| match c {
        Component::ParentDir => Some("parent directory traversal"),
        Component::RootDir => Some("absolute path"),
        Component::Prefix(_) => Some("path prefix"),
        Component::CurDir | Component::Normal(_) => None,
    });

    match reason {
        Some(reason) => Err(GatewayError::InvalidPath(format!(
            "{reason} not allowed: {path}"
        ))),
        None => Ok(()),
    }
}
