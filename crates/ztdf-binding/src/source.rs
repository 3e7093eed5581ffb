//! Key material providers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

/// Where PEM text for certificates and keys comes from.
///
/// The store reads through this seam so deployments can plug in a secrets
/// backend; the default reads the local filesystem.
#[async_trait]
pub trait PemSource: Send + Sync + std::fmt::Debug {
    /// Read the PEM document at `path`. A missing document must be reported
    /// as `std::io::ErrorKind::NotFound`.
    async fn read_pem(&self, path: &Path) -> std::io::Result<String>;
}

/// Reads PEM files with `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPemSource;

#[async_trait]
impl PemSource for FsPemSource {
    async fn read_pem(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

/// In-memory PEM documents keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryPemSource {
    documents: Arc<RwLock<HashMap<PathBuf, String>>>,
}

impl MemoryPemSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the document at `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, pem: impl Into<String>) {
        let mut docs = self.documents.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(path.into(), pem.into());
    }

    pub fn remove(&self, path: &Path) {
        let mut docs = self.documents.write().unwrap_or_else(|e| e.into_inner());
        docs.remove(path);
    }
}

#[async_trait]
impl PemSource for MemoryPemSource {
    async fn read_pem(&self, path: &Path) -> std::io::Result<String> {
        let docs = self.documents.read().unwrap_or_else(|e| e.into_inner());
        docs.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no document at {}", path.display()),
            )
        })
    }
}
