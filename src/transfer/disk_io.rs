//! StorageTier: durable key -> bytes persistence.
//!
//! One file per locator, named by the locator's SHA-256, directly under the
//! cache directory. There is no index: presence is discovered by looking the
//! file up. Entries never expire; deleting them is up to the operator.
//!
//! Reads never fail from the caller's point of view (an unreadable file is
//! reported as absent). Writes may fail; the cache treats that as non-fatal.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::locator::Locator;

const ENTRY_EXTENSION: &str = "asset";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cache directory is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Disk tier rooted at a dedicated directory.
pub struct StorageTier {
    root: PathBuf,
    stats: DiskIoStats,
}

#[derive(Debug, Default)]
pub struct DiskIoStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

impl StorageTier {
    /// Open (creating if needed) the cache directory.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        if !fs::metadata(&root).await?.is_dir() {
            return Err(PersistError::NotADirectory(root));
        }

        Ok(Self {
            root,
            stats: DiskIoStats::default(),
        })
    }

    /// The cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path an entry for `locator` lives at.
    pub fn path_for(&self, locator: &Locator) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", locator.storage_key()))
    }

    /// Read the stored bytes for a locator, or `None` if absent/unreadable.
    pub async fn read_bytes(&self, locator: &Locator) -> Option<Bytes> {
        let path = self.path_for(locator);

        match fs::read(&path).await {
            Ok(data) => {
                debug!(
                    locator = %locator,
                    path = %path.display(),
                    size = data.len(),
                    "Read asset from disk"
                );
                self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .total_bytes_read
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                Some(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(locator = %locator, path = %path.display(), error = %e, "Unreadable disk entry");
                None
            }
        }
    }

    /// Persist bytes for a locator, replacing any previous entry.
    ///
    /// Writes to a temporary file and renames it into place, so a reader
    /// never observes a partially written entry.
    pub async fn write_bytes(&self, locator: &Locator, data: &[u8]) -> Result<PathBuf, PersistError> {
        let path = self.path_for(locator);
        let tmp = self
            .root
            .join(format!("{}.{}.tmp", locator.storage_key(), Uuid::new_v4()));

        fs::create_dir_all(&self.root).await?;
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            locator = %locator,
            path = %path.display(),
            size = data.len(),
            "Wrote asset to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        Ok(path)
    }

    /// Get disk I/O statistics.
    pub fn stats(&self) -> &DiskIoStats {
        &self.stats
    }

    /// Total size of all entries in the cache directory.
    pub async fn disk_usage(&self) -> Result<u64, PersistError> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_entry = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == ENTRY_EXTENSION);
            if !is_entry {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                total += meta.len();
            }
        }

        Ok(total)
    }
}
