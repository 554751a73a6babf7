//! Local filesystem storage backend.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{BlobBackend, BlobReader, Zone};
use crate::Result;

/// Filesystem-backed blob storage rooted at a base directory, one
/// subdirectory per zone.
pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    /// Create the backend, ensuring all zone directories exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        for zone in Zone::ALL {
            std::fs::create_dir_all(base_path.join(zone.as_str()))?;
        }
        Ok(Self { base_path })
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    async fn store(
        &self,
        zone: Zone,
        filename: &str,
        mut reader: BlobReader,
    ) -> Result<(String, u64)> {
        let path = self.base_path.join(zone.as_str()).join(filename);

        let mut file = tokio::fs::File::create(&path).await?;
        let size = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(size) => size,
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(err.into());
            }
        };

        Ok((path.to_string_lossy().to_string(), size))
    }

    async fn retrieve(&self, path: &str) -> Result<BlobReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(meta.len())
    }
}
