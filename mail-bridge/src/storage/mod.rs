//! File storage capability.
//!
//! Uploaded CSV batches are stored before the API enqueues them; the
//! envelope only carries the path. The worker resolves it here.

pub mod csv_rows;

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StorageFailure;

pub use csv_rows::{CsvRows, Row, RowStream, REQUIRED_COLUMNS};

/// Readable byte stream handed out by storage.
pub type ByteStream = Box<dyn Read + Send>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a stored file. Fails with [`StorageFailure::NotFound`] if it is absent.
    ///
    /// Reading the returned stream may block; async callers go through
    /// [`RowStream`].
    async fn open_for_read(&self, path: &str) -> Result<ByteStream, StorageFailure>;
}

/// Local-disk storage rooted at a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Join `path` onto the base. A leading `/` is dropped; any other root,
    /// prefix or `..` component is rejected so the result stays under the base.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageFailure> {
        let relative = Path::new(path.trim_start_matches('/'));

        let mut has_file = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_file = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageFailure::InvalidPath(path.to_string()))
                }
            }
        }
        if !has_file {
            return Err(StorageFailure::InvalidPath(path.to_string()));
        }

        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn open_for_read(&self, path: &str) -> Result<ByteStream, StorageFailure> {
        let full_path = self.resolve(path).map_err(|e| {
            warn!(path, error = %e, "storage_path_rejected");
            e
        })?;
        debug!(path = %full_path.display(), "storage_open");

        let file = tokio::fs::File::open(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageFailure::NotFound(path.to_string())
            } else {
                StorageFailure::Io {
                    path: path.to_string(),
                    source: e,
                }
            }
        })?;

        Ok(Box::new(file.into_std().await))
    }
}

/// In-memory storage keyed by path, for tests.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), contents.into());
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn open_for_read(&self, path: &str) -> Result<ByteStream, StorageFailure> {
        let contents = self
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| StorageFailure::NotFound(path.to_string()))?;

        Ok(Box::new(Cursor::new(contents)))
    }
}
