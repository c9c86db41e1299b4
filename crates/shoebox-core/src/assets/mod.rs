//! Local asset store: app-private copies of picked images.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::ImageId;
use crate::util::dotted_extension;
use crate::{Error, Result};

/// Durable local storage for image bytes.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Copy `source` into app storage under a name derived from `id`.
    async fn persist(&self, source: &Path, id: &ImageId) -> Result<PathBuf>;

    /// Delete a stored asset. A missing file counts as success.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Whether `path` is still there. Unconfirmed checks count as present.
    async fn exists(&self, path: &Path) -> bool;

    /// Read a stored asset for upload.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

/// `AssetStore` backed by a directory on the local filesystem.
///
/// Copies land in a hidden `.partial` file first and are renamed into place,
/// so a crash mid-copy never leaves a truncated asset under its final name.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn destination(&self, source: &Path, id: &ImageId) -> PathBuf {
        self.root.join(id.object_key(&dotted_extension(source)))
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn persist(&self, source: &Path, id: &ImageId) -> Result<PathBuf> {
        let destination = self.destination(source, id);
        let partial = self.root.join(format!(".{id}.partial"));

        let copied = async {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::copy(source, &partial).await?;
            tokio::fs::rename(&partial, &destination).await
        }
        .await;

        if let Err(error) = copied {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {cleanup}", partial.display());
                }
            }
            return Err(Error::LocalPersist(format!(
                "Failed to copy {} into {}: {error}",
                source.display(),
                self.root.display()
            )));
        }

        tracing::debug!("Persisted {} as {}", source.display(), destination.display());
        Ok(destination)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::debug!("Asset {} already removed", path.display());
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        match tokio::fs::try_exists(path).await {
            Ok(exists) => exists,
            Err(error) => {
                // Only a confirmed absence counts as missing.
                tracing::warn!("Could not check asset {}: {error}", path.display());
                true
            }
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }
}
