use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::{MediaError, Result};

/// URL path marker separating the public host part from the storage path.
const URL_MARKER: &str = "/media/";

/// External blob store consumed by the deletion coordinator.
///
/// Implementations are best-effort: `delete_blob` on a path that does not
/// exist must succeed, and callers treat any error as a soft failure to be
/// reported, never as a reason to abort a cascade.
pub trait MediaGateway: Send + Sync {
    /// Delete the blob stored at `path`.
    fn delete_blob(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Derive the storage path from a public URL, for legacy records that
    /// never persisted the path.  `None` when the URL is not recognizable.
    fn resolve_blob_path(&self, url: &str) -> Option<String>;
}

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal through hostile storage paths.
fn ensure_within(base: &Path, target: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(target).components() {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(MediaError::InvalidPath(target.to_string()));
            }
            _ => {} // RootDir, CurDir, Prefix — skip
        }
    }
    if !resolved.starts_with(base) {
        return Err(MediaError::InvalidPath(target.to_string()));
    }
    Ok(resolved)
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct FsMediaGateway {
    base_path: PathBuf,
}

impl FsMediaGateway {
    pub async fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            MediaError::Storage(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media gateway initialized");

        Ok(Self { base_path })
    }

    /// Public URL under which a stored blob is served.
    pub fn public_url(&self, path: &str) -> String {
        format!("https://cdn.wander.example{URL_MARKER}{path}")
    }

    /// Write a blob at `path` (relative to the base directory), creating
    /// parent directories as needed.  Used by the upload handlers and by
    /// test fixtures.
    pub async fn store_blob(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = ensure_within(&self.base_path, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                MediaError::Storage(format!("Failed to create '{}': {}", parent.display(), e))
            })?;
        }

        fs::write(&full, data)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to write blob {path}: {e}")))?;

        debug!(path = %path, size = data.len(), "Stored blob");
        Ok(())
    }

    /// Whether a blob currently exists at `path`.
    pub async fn blob_exists(&self, path: &str) -> bool {
        match ensure_within(&self.base_path, path) {
            Ok(full) => fs::try_exists(&full).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl MediaGateway for FsMediaGateway {
    async fn delete_blob(&self, path: &str) -> Result<()> {
        let full = ensure_within(&self.base_path, path)?;

        match fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path = %path, "Deleted blob");
                Ok(())
            }
            // already gone: deletion is idempotent
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path, "Blob already absent");
                Ok(())
            }
            Err(e) => Err(MediaError::Storage(format!(
                "Failed to delete blob {path}: {e}"
            ))),
        }
    }

    fn resolve_blob_path(&self, url: &str) -> Option<String> {
        let (_, path) = url.split_once(URL_MARKER)?;
        if path.is_empty() {
            return None;
        }
        Some(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_gateway() -> (FsMediaGateway, TempDir) {
        let dir = TempDir::new().unwrap();
        let gateway = FsMediaGateway::new(dir.path().to_path_buf()).await.unwrap();
        (gateway, dir)
    }

    #[tokio::test]
    async fn test_store_and_delete() {
        let (gateway, _dir) = test_gateway().await;

        gateway.store_blob("posts/a.jpg", b"jpeg-bytes").await.unwrap();
        assert!(gateway.blob_exists("posts/a.jpg").await);

        gateway.delete_blob("posts/a.jpg").await.unwrap();
        assert!(!gateway.blob_exists("posts/a.jpg").await);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (gateway, _dir) = test_gateway().await;
        gateway.delete_blob("never/was.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (gateway, _dir) = test_gateway().await;
        assert!(gateway.delete_blob("../outside.txt").await.is_err());
        assert!(gateway.store_blob("a/../../b.txt", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_from_url() {
        let (gateway, _dir) = test_gateway().await;

        let url = gateway.public_url("profiles/u1.png");
        assert_eq!(
            gateway.resolve_blob_path(&url),
            Some("profiles/u1.png".to_string())
        );
        assert_eq!(gateway.resolve_blob_path("https://elsewhere/x.png"), None);
        assert_eq!(gateway.resolve_blob_path("https://cdn.wander.example/media/"), None);
    }
}
