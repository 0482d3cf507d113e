//! Content-addressed local disk store.
//!
//! Layout under the cache directory:
//! - `action/<action-hex>`: marker file holding `<object-hex>:<size>`
//! - `object/<object-hex>`: the object bytes
//!
//! Features:
//! - Atomic writes via write-to-temp-then-rename, for objects and markers
//! - Every lookup re-validates the object size against the marker, so
//!   truncated, replaced or missing objects read as misses
//! - Concurrent writes to the same key: last rename wins

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;
use crate::keys::{ActionKey, ObjectKey};
use crate::provider::{Body, CacheHit, Provider};

const ACTION_DIR: &str = "action";
const OBJECT_DIR: &str = "object";

/// Sequence for temp file names within this process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A validated `ActionKey -> (ObjectKey, size)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub object: ObjectKey,
    /// Size recorded in the marker, equal to the object file's size.
    pub size: u64,
    /// Absolute path of the object file.
    pub disk_path: PathBuf,
}

/// Result of writing an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub disk_path: PathBuf,
    /// Number of bytes actually written.
    pub size: u64,
}

/// Local disk tier.
#[derive(Debug, Clone)]
pub struct LocalStore {
    action_dir: PathBuf,
    object_dir: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `cache_dir`.
    ///
    /// Creates the directory layout if needed. The root is canonicalized, so
    /// all paths handed out are absolute.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let cache_dir = cache_dir.as_ref();
        if cache_dir.as_os_str().is_empty() {
            return Err(StoreError::EmptyCacheDir);
        }

        for name in [ACTION_DIR, OBJECT_DIR] {
            let dir = cache_dir.join(name);
            std::fs::create_dir_all(&dir).map_err(StoreError::at(&dir))?;
        }

        let root = std::fs::canonicalize(cache_dir).map_err(StoreError::at(cache_dir))?;

        Ok(Self {
            action_dir: root.join(ACTION_DIR),
            object_dir: root.join(OBJECT_DIR),
        })
    }

    fn action_path(&self, action: &ActionKey) -> PathBuf {
        self.action_dir.join(action.to_hex())
    }

    /// Path of the object file for `object`, whether or not it exists.
    pub fn object_path(&self, object: &ObjectKey) -> PathBuf {
        self.object_dir.join(object.to_hex())
    }

    /// Look up the entry for `action`.
    ///
    /// A missing or malformed marker, a missing object file, or a size that
    /// disagrees with the marker all yield `Ok(None)`.
    pub async fn lookup(&self, action: &ActionKey) -> Result<Option<CacheEntry>, StoreError> {
        let marker_path = self.action_path(action);

        let data = match fs::read(&marker_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::at(marker_path)(e)),
        };

        // Invalid entries are left in place and bypassed
        let Some((object, size)) = parse_marker(&data) else {
            debug!(action = %action, "malformed action marker");
            return Ok(None);
        };

        let disk_path = self.object_path(&object);
        match fs::metadata(&disk_path).await {
            Ok(meta) if meta.is_file() && meta.len() == size => Ok(Some(CacheEntry {
                object,
                size,
                disk_path,
            })),
            Ok(meta) => {
                debug!(
                    action = %action,
                    recorded = size,
                    actual = meta.len(),
                    "object size does not match action marker"
                );
                Ok(None)
            }
            Err(_) => {
                debug!(action = %action, object = %object, "object file missing");
                Ok(None)
            }
        }
    }

    /// Write `body` as `object` and record it for `action`.
    ///
    /// The recorded size is the number of bytes streamed.
    pub async fn store(
        &self,
        action: &ActionKey,
        object: &ObjectKey,
        body: Body<'_>,
    ) -> Result<StoredObject, StoreError> {
        let (temp_path, size) = self.copy_to_temp(&self.object_dir, body).await?;
        self.commit(action, object, &temp_path, size).await
    }

    /// Like [`LocalStore::store`], but only records the entry when exactly
    /// `expected_size` bytes were streamed. Returns `Ok(None)` otherwise.
    pub async fn store_verified(
        &self,
        action: &ActionKey,
        object: &ObjectKey,
        body: Body<'_>,
        expected_size: u64,
    ) -> Result<Option<StoredObject>, StoreError> {
        let (temp_path, size) = self.copy_to_temp(&self.object_dir, body).await?;

        if size != expected_size {
            debug!(object = %object, expected = expected_size, actual = size, "discarding short object");
            let _ = fs::remove_file(&temp_path).await;
            return Ok(None);
        }

        self.commit(action, object, &temp_path, size).await.map(Some)
    }

    /// Move a fully written temp file into place, then publish the marker.
    async fn commit(
        &self,
        action: &ActionKey,
        object: &ObjectKey,
        temp_path: &Path,
        size: u64,
    ) -> Result<StoredObject, StoreError> {
        let disk_path = self.object_path(object);
        rename_into_place(temp_path, &disk_path).await?;

        let marker = format!("{}:{}", object.to_hex(), size);
        let mut marker_body = marker.as_bytes();
        let (marker_temp, _) = self.copy_to_temp(&self.action_dir, &mut marker_body).await?;
        rename_into_place(&marker_temp, &self.action_path(action)).await?;

        Ok(StoredObject { disk_path, size })
    }

    /// Stream `body` into a fresh temp file inside `dir`.
    async fn copy_to_temp(&self, dir: &Path, body: Body<'_>) -> Result<(PathBuf, u64), StoreError> {
        let temp_path = dir.join(format!(
            ".tmp.{}.{}",
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let written = async {
            let mut file = File::create(&temp_path).await?;
            let size = tokio::io::copy(body, &mut file).await?;
            file.flush().await?;
            Ok::<u64, io::Error>(size)
        }
        .await;

        match written {
            Ok(size) => Ok((temp_path, size)),
            Err(e) => {
                // Clean up temp file on error
                let _ = fs::remove_file(&temp_path).await;
                Err(StoreError::at(temp_path)(e))
            }
        }
    }
}

async fn rename_into_place(temp_path: &Path, final_path: &Path) -> Result<(), StoreError> {
    if let Err(e) = fs::rename(temp_path, final_path).await {
        let _ = fs::remove_file(temp_path).await;
        return Err(StoreError::at(final_path)(e));
    }
    Ok(())
}

/// Parse `<object-hex>:<size>`.
fn parse_marker(data: &[u8]) -> Option<(ObjectKey, u64)> {
    let text = std::str::from_utf8(data).ok()?;
    let (object, size) = text.split_once(':')?;
    let object = ObjectKey::from_hex(object)?;
    let size = size.parse::<u64>().ok()?;
    Some((object, size))
}

#[async_trait]
impl Provider for LocalStore {
    async fn get(&self, action: &ActionKey) -> Result<Option<CacheHit>, StoreError> {
        Ok(self.lookup(action).await?.map(|entry| CacheHit {
            object: entry.object,
            disk_path: entry.disk_path,
        }))
    }

    async fn put(
        &self,
        action: &ActionKey,
        object: &ObjectKey,
        body: Body<'_>,
    ) -> Result<PathBuf, StoreError> {
        Ok(self.store(action, object, body).await?.disk_path)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
