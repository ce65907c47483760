//! Document store capability
//!
//! The sync engine reads and writes vault files through this trait so it can
//! run against the real filesystem or an in-memory store in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{Result, VaultError};

/// Read/write access to the vault's documents
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Full text of one file
    async fn read_file(&self, path: &Path) -> Result<String>;

    /// Replace the full text of one file, creating it if needed
    async fn write_file(&self, path: &Path, text: &str) -> Result<()>;

    /// All Markdown files in the vault
    async fn list_files(&self) -> Result<Vec<PathBuf>>;
}

/// Filesystem-backed vault store rooted at a directory
pub struct FsVaultStore {
    root: PathBuf,
}

impl FsVaultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl VaultStore for FsVaultStore {
    async fn read_file(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.resolve(path)).await?)
    }

    async fn write_file(&self, path: &Path, text: &str) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, text).await?;
        debug!(path = %full.display(), "wrote vault file");
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().map(|e| e == "md").unwrap_or(false) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

/// In-memory vault store (for testing)
#[derive(Default, Clone)]
pub struct MemoryVaultStore {
    files: Arc<RwLock<HashMap<PathBuf, String>>>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files.write().await.insert(path.into(), text.into());
    }

    pub async fn remove(&self, path: &Path) {
        self.files.write().await.remove(path);
    }

    pub async fn get(&self, path: &Path) -> Option<String> {
        self.files.read().await.get(path).cloned()
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn read_file(&self, path: &Path) -> Result<String> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| VaultError::FileNotFound(path.display().to_string()))
    }

    async fn write_file(&self, path: &Path, text: &str) -> Result<()> {
        self.files
            .write()
            .await
            .insert(path.to_path_buf(), text.to_string());
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self.files.read().await.keys().cloned().collect();
        files.sort();
        Ok(files)
    }
}
