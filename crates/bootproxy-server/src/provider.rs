//! Sources of config-drive images.
//!
//! The server does not know how a machine's provisioning data is produced.
//! A [`ConfigDriveProvider`] reports the current version of a machine's data
//! and renders the ISO on demand; the server caches rendered images and
//! re-renders when the version changes.

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Produces config-drive images by id.
#[async_trait]
pub trait ConfigDriveProvider: Send + Sync {
    /// Returns the version of the data behind `id`, or `None` if there is no
    /// config drive for it.
    async fn source_version(&self, id: &str) -> Result<Option<String>>;

    /// Renders the config-drive image for `id`.
    async fn render(&self, id: &str) -> Result<Bytes>;
}

/// Provider with no config drives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConfigDrives;

#[async_trait]
impl ConfigDriveProvider for NoConfigDrives {
    async fn source_version(&self, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn render(&self, id: &str) -> Result<Bytes> {
        Err(ProxyError::ConfigDriveNotFound { id: id.to_string() })
    }
}

/// In-memory provider, mainly for tests and static setups.
#[derive(Debug, Default)]
pub struct StaticConfigDrives {
    drives: RwLock<HashMap<String, (String, Bytes)>>,
}

impl StaticConfigDrives {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the image for `id`.
    pub fn insert(&self, id: impl Into<String>, version: impl Into<String>, image: Bytes) {
        self.drives
            .write()
            .insert(id.into(), (version.into(), image));
    }

    /// Removes the image for `id`.
    pub fn remove(&self, id: &str) {
        self.drives.write().remove(id);
    }
}

#[async_trait]
impl ConfigDriveProvider for StaticConfigDrives {
    async fn source_version(&self, id: &str) -> Result<Option<String>> {
        Ok(self.drives.read().get(id).map(|(v, _)| v.clone()))
    }

    async fn render(&self, id: &str) -> Result<Bytes> {
        self.drives
            .read()
            .get(id)
            .map(|(_, image)| image.clone())
            .ok_or_else(|| ProxyError::ConfigDriveNotFound { id: id.to_string() })
    }
}

/// Serves pre-built `<id>.iso` files from a directory.
///
/// The version of a drive is derived from the file's length and
/// modification time, so replacing a file invalidates the cached copy.
#[derive(Debug, Clone)]
pub struct DirectoryConfigDrives {
    root: PathBuf,
}

impl DirectoryConfigDrives {
    /// Creates a provider reading from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(ProxyError::ConfigDriveNotFound { id: id.to_string() });
        }
        Ok(self.root.join(format!("{id}.iso")))
    }
}

#[async_trait]
impl ConfigDriveProvider for DirectoryConfigDrives {
    async fn source_version(&self, id: &str) -> Result<Option<String>> {
        let path = self.path_for(id)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProxyError::ConfigDrive {
                    id: id.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        Ok(Some(format!("{}-{modified}", metadata.len())))
    }

    async fn render(&self, id: &str) -> Result<Bytes> {
        let path = self.path_for(id)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| ProxyError::ConfigDrive {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticConfigDrives::new();
        provider.insert("m1", "1", Bytes::from_static(b"iso"));

        assert_eq!(provider.source_version("m1").await.unwrap().as_deref(), Some("1"));
        assert_eq!(provider.render("m1").await.unwrap(), Bytes::from_static(b"iso"));
        assert!(provider.source_version("m2").await.unwrap().is_none());

        provider.remove("m1");
        assert!(matches!(
            provider.render("m1").await,
            Err(ProxyError::ConfigDriveNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_config_drives() {
        assert!(NoConfigDrives.source_version("m1").await.unwrap().is_none());
        assert!(NoConfigDrives.render("m1").await.is_err());
    }

    #[tokio::test]
    async fn test_directory_provider() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("m1.iso"), b"iso-image").await.unwrap();

        let provider = DirectoryConfigDrives::new(dir.path());
        let version = provider.source_version("m1").await.unwrap();
        assert!(version.is_some_and(|v| v.starts_with("9-")));
        assert_eq!(provider.render("m1").await.unwrap(), Bytes::from_static(b"iso-image"));
        assert!(provider.source_version("m2").await.unwrap().is_none());
        assert!(provider.source_version("../etc/passwd").await.is_err());
    }
}
