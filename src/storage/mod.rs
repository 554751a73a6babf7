//! Zoned blob storage.
//!
//! The keyspace is partitioned into three zones: `upload` for client
//! originals, `working` for intermediates, `output` for completed
//! artifacts. Remote backends (S3, Supabase) live behind [`BlobBackend`]
//! and are external collaborators; only the local filesystem backend ships
//! here.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::warn;

use crate::config::StorageConfig;
use crate::{Error, Result};

pub use local::LocalBackend;

/// Storage zone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Upload,
    Working,
    Output,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Working => "working",
            Self::Output => "output",
        }
    }

    pub const ALL: [Zone; 3] = [Zone::Upload, Zone::Working, Zone::Output];
}

/// Boxed async byte stream handed across the backend boundary.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage backend contract.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// True when blobs live off-host and must be staged for the media tool.
    fn is_remote(&self) -> bool {
        false
    }
    /// Write a blob; returns its storage path and size in bytes.
    async fn store(&self, zone: Zone, filename: &str, reader: BlobReader) -> Result<(String, u64)>;
    async fn retrieve(&self, path: &str) -> Result<BlobReader>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn size(&self, path: &str) -> Result<u64>;
}

/// Cleanup handle for staged inputs.
///
/// Releasing is idempotent, and `Drop` releases too, so staged temp files
/// are removed on every exit path even when the executor errors out early.
pub struct ReleaseGuard {
    path: Option<PathBuf>,
}

impl ReleaseGuard {
    /// Guard that owns nothing (local backend inputs).
    pub fn noop() -> Self {
        Self { path: None }
    }

    /// Guard that removes `path` on release.
    pub fn removing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn release(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove staged input {}: {}", path.display(), err);
                }
            }
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Storage facade: backend + path layout + staging for the media tool.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn BlobBackend>,
    base_path: PathBuf,
}

impl StorageService {
    pub fn new(backend: Arc<dyn BlobBackend>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            base_path: base_path.into(),
        }
    }

    /// Build a service from configuration. Only the local backend is
    /// compiled into this crate; remote selectors are rejected explicitly.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        match cfg.backend.as_str() {
            "local" => {
                let backend = LocalBackend::new(&cfg.base_path)?;
                Ok(Self::new(Arc::new(backend), &cfg.base_path))
            }
            other => Err(Error::config(format!(
                "storage backend '{}' is not available in this build (use 'local')",
                other
            ))),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.backend.is_remote()
    }

    /// The storage path for a file in a zone. Local backends get a full
    /// filesystem path; remote backends an object key `zone/filename`.
    pub fn path_for(&self, zone: Zone, filename: &str) -> String {
        if self.is_remote() {
            format!("{}/{}", zone.as_str(), filename)
        } else {
            self.base_path
                .join(zone.as_str())
                .join(filename)
                .to_string_lossy()
                .to_string()
        }
    }

    pub async fn store(
        &self,
        zone: Zone,
        filename: &str,
        reader: BlobReader,
    ) -> Result<(String, u64)> {
        self.backend.store(zone, filename, reader).await
    }

    pub async fn retrieve(&self, path: &str) -> Result<BlobReader> {
        self.backend.retrieve(path).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.backend.delete(path).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.backend.exists(path).await
    }

    pub async fn size(&self, path: &str) -> Result<u64> {
        self.backend.size(path).await
    }

    /// Stage an input for the media tool.
    ///
    /// Remote backends download to a temp file and return a guard that
    /// removes it; local backends return the path as-is with a no-op guard.
    pub async fn prepare_input(&self, storage_path: &str) -> Result<(String, ReleaseGuard)> {
        if !self.is_remote() {
            return Ok((storage_path.to_string(), ReleaseGuard::noop()));
        }

        let ext = Path::new(storage_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let staging_dir = std::env::temp_dir().join("mediaconv");
        tokio::fs::create_dir_all(&staging_dir).await?;
        let local_path = staging_dir.join(format!("in-{}{}", uuid::Uuid::new_v4(), ext));

        let mut reader = self.backend.retrieve(storage_path).await?;
        let mut file = tokio::fs::File::create(&local_path).await?;
        if let Err(err) = tokio::io::copy(&mut reader, &mut file).await {
            drop(file);
            let _ = tokio::fs::remove_file(&local_path).await;
            return Err(err.into());
        }

        Ok((
            local_path.to_string_lossy().to_string(),
            ReleaseGuard::removing(local_path),
        ))
    }

    /// Publish a finished artifact.
    ///
    /// Remote backends upload from the local output; for local backends the
    /// artifact was already written at `storage_path` and this is a no-op.
    pub async fn finalize_output(&self, storage_path: &str, local_path: &str) -> Result<()> {
        if !self.is_remote() {
            return Ok(());
        }

        let (zone, filename) = storage_path
            .split_once('/')
            .ok_or_else(|| Error::storage(format!("invalid storage path: {}", storage_path)))?;
        let zone: Zone = zone
            .parse()
            .map_err(|_| Error::storage(format!("invalid storage zone in path: {}", storage_path)))?;

        let file = tokio::fs::File::open(local_path).await?;
        self.backend
            .store(zone, filename, Box::new(file))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> StorageService {
        let cfg = StorageConfig {
            backend: "local".to_string(),
            base_path: dir.path().to_string_lossy().to_string(),
            s3_endpoint: String::new(),
            s3_bucket: String::new(),
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_region: String::new(),
        };
        StorageService::from_config(&cfg).unwrap()
    }

    #[test]
    fn test_zone_round_trip() {
        for zone in Zone::ALL {
            assert_eq!(zone.as_str().parse::<Zone>().unwrap(), zone);
        }
        assert!("staging".parse::<Zone>().is_err());
    }

    #[test]
    fn test_remote_selector_rejected() {
        let cfg = StorageConfig {
            backend: "s3".to_string(),
            base_path: "./data".to_string(),
            s3_endpoint: String::new(),
            s3_bucket: String::new(),
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_region: String::new(),
        };
        assert!(StorageService::from_config(&cfg).is_err());
    }

    #[test]
    fn test_release_guard_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("staged.mp4");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"data").unwrap();
        drop(f);

        let mut guard = ReleaseGuard::removing(&path);
        guard.release();
        assert!(!path.exists());
        // Second release is safe.
        guard.release();
        drop(guard);
    }

    #[tokio::test]
    async fn test_local_store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let storage = service(&dir);

        let reader: BlobReader = Box::new(std::io::Cursor::new(b"hello".to_vec()));
        let (path, size) = storage.store(Zone::Upload, "clip.mp4", reader).await.unwrap();
        assert_eq!(size, 5);
        assert!(storage.exists(&path).await.unwrap());
        assert_eq!(storage.size(&path).await.unwrap(), 5);

        let mut body = Vec::new();
        let mut reader = storage.retrieve(&path).await.unwrap();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut body)
            .await
            .unwrap();
        assert_eq!(body, b"hello");

        storage.delete(&path).await.unwrap();
        assert!(!storage.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_prepare_input_is_passthrough() {
        let dir = TempDir::new().unwrap();
        let storage = service(&dir);
        assert!(!storage.is_remote());

        let (local, mut guard) = storage.prepare_input("/some/path.mp4").await.unwrap();
        assert_eq!(local, "/some/path.mp4");
        guard.release();

        // Local finalize is a no-op.
        storage.finalize_output("/out/a.mp4", "/tmp/a.mp4").await.unwrap();
    }

    #[test]
    fn test_path_for_local_layout() {
        let dir = TempDir::new().unwrap();
        let storage = service(&dir);
        let path = storage.path_for(Zone::Output, "job-1.mp4");
        assert!(path.ends_with("output/job-1.mp4") || path.ends_with("output\\job-1.mp4"));
    }
}
