//! Filesystem primitives
//!
//! The engine only needs a handful of operations on the storage tree:
//! existence checks, recursive directory creation and removal, emptying a
//! directory, and moving or copying a file into place.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Filesystem trait - the primitives the attachment engine writes through
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> bool;

    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Remove a directory and everything below it; a missing directory is not an error
    async fn remove_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Remove the contents of a directory but keep the directory itself
    async fn empty_dir(&self, path: &Path) -> StorageResult<()>;

    /// Move a file into place, replacing any existing target
    async fn move_file(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Copy a file into place, replacing any existing target
    async fn copy_file(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Read at most `len` leading bytes of a file
    async fn read_prefix(&self, path: &Path, len: usize) -> StorageResult<Bytes>;

    /// Get filesystem name for logging
    fn name(&self) -> &str;
}

/// Local filesystem backed by `tokio::fs`
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    /// Writes and deletions must stay below this directory
    root: PathBuf,
}

impl LocalFilesystem {
    /// Create a filesystem that only writes below `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a path that is about to be written to or deleted
    fn resolve_target(&self, path: &Path) -> StorageResult<PathBuf> {
        // Prevent directory traversal
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }

        if !path.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }

        // Never hand the root itself to a recursive delete
        if path == self.root {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }

        Ok(path.to_path_buf())
    }

    /// Ensure parent directory exists
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        let path = self.resolve_target(path)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(fs = "local"))]
    async fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        let path = self.resolve_target(path)?;

        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = ?path, "Directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(fs = "local"))]
    async fn empty_dir(&self, path: &Path) -> StorageResult<()> {
        let path = self.resolve_target(path)?;

        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&entry_path).await?;
            } else {
                fs::remove_file(&entry_path).await?;
            }
        }

        debug!(path = ?path, "Directory emptied");
        Ok(())
    }

    #[instrument(skip(self), fields(fs = "local"))]
    async fn move_file(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let to = self.resolve_target(to)?;

        if !self.exists(from).await {
            return Err(StorageError::NotFound(from.display().to_string()));
        }

        self.ensure_parent(&to).await?;

        // Rename fails across devices (e.g. tmpfs uploads); fall back to copy
        if fs::rename(from, &to).await.is_err() {
            fs::copy(from, &to).await?;
            fs::remove_file(from).await?;
        }

        debug!(from = ?from, to = ?to, "File moved");
        Ok(())
    }

    #[instrument(skip(self), fields(fs = "local"))]
    async fn copy_file(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let to = self.resolve_target(to)?;

        if !self.exists(from).await {
            return Err(StorageError::NotFound(from.display().to_string()));
        }

        self.ensure_parent(&to).await?;
        fs::copy(from, &to).await?;

        debug!(from = ?from, to = ?to, "File copied");
        Ok(())
    }

    async fn read_prefix(&self, path: &Path, len: usize) -> StorageResult<Bytes> {
        let file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut buffer = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    fn name(&self) -> &str {
        "local"
    }
}
