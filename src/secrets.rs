//! Path-addressed secret storage
//!
//! Passwords live in a key store addressed by slash-separated paths such as
//! `keys/windows/node1.password`. The copier only needs `get`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Secret store failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no resource at path: {0}")]
    NotFound(String),

    #[error("invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("resource at {0} is a directory")]
    NotAResource(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A normalised storage path: no leading, trailing or duplicate separators
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath(String);

impl StoragePath {
    /// Normalise `raw` into a storage path
    ///
    /// ```
    /// use cifs_copier::secrets::StoragePath;
    ///
    /// let path = StoragePath::parse("/keys//windows/node1.pw/").unwrap();
    /// assert_eq!(path.as_str(), "keys/windows/node1.pw");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();

        if segments.is_empty() {
            return Err(StorageError::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty".to_string(),
            });
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(StorageError::InvalidPath {
                path: raw.to_string(),
                reason: "relative segments are not allowed".to_string(),
            });
        }

        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, root first
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read access to a secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Full content of the resource at `path`
    async fn get(&self, path: &StoragePath) -> Result<Vec<u8>, StorageError>;
}

/// Secret store held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    entries: Arc<RwLock<HashMap<StoragePath, Vec<u8>>>>,
    lookups: Arc<RwLock<Vec<StoragePath>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` at `path`
    pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        let path = StoragePath::parse(path)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, content.into());
        Ok(())
    }

    /// Every path passed to `get`, in order
    pub fn lookups(&self) -> Vec<StoragePath> {
        self.lookups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, path: &StoragePath) -> Result<Vec<u8>, StorageError> {
        self.lookups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.clone());

        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

/// Secret store backed by a directory tree; each storage path names a file
/// below the root.
#[derive(Debug, Clone)]
pub struct DirectorySecretStore {
    root: PathBuf,
}

impl DirectorySecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &StoragePath) -> PathBuf {
        path.segments()
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

#[async_trait]
impl SecretStore for DirectorySecretStore {
    async fn get(&self, path: &StoragePath) -> Result<Vec<u8>, StorageError> {
        let file = self.resolve(path);
        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_dir() => Err(StorageError::NotAResource(path.to_string())),
            Ok(_) => Ok(tokio::fs::read(&file).await?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
