//! Local store extended with a remote object store tier.
//!
//! The local store is the path of record: every successful `put` has a valid
//! local copy, and local hits never touch the network. Remote reads are
//! best-effort (any failure is a miss), remote writes are not (an upload
//! failure fails the `put`).
//!
//! | Condition | Outcome |
//! |---|---|
//! | local hit | hit, no remote call |
//! | local miss, remote absent or malformed | miss |
//! | local miss, remote fetch fails | miss |
//! | local miss, remote hit, promotion fails | miss |
//! | local miss, remote hit, size mismatch | miss |
//! | put: local write fails | error |
//! | put: size below threshold | success, no remote call |
//! | put: upload fails | error |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::keys::{ActionKey, ObjectKey};
use crate::local::LocalStore;
use crate::provider::{Body, CacheHit, Provider};
use crate::remote::{action_key, HttpRemote, RemoteConfig, RemoteStore, OBJECT_ID_KEY, SIZE_KEY};

/// Objects smaller than this are kept local only.
pub const DEFAULT_MIN_UPLOAD_SIZE: u64 = 1024;

/// Tiered store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredConfig {
    /// Minimum object size for remote upload; 0 selects the default.
    pub min_upload_size: u64,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            min_upload_size: DEFAULT_MIN_UPLOAD_SIZE,
        }
    }
}

/// Local store with a remote tier behind it.
pub struct TieredStore {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    min_upload_size: u64,
}

impl TieredStore {
    pub fn new(local: LocalStore, remote: Arc<dyn RemoteStore>, config: TieredConfig) -> Self {
        let min_upload_size = if config.min_upload_size == 0 {
            DEFAULT_MIN_UPLOAD_SIZE
        } else {
            config.min_upload_size
        };

        Self {
            local,
            remote,
            min_upload_size,
        }
    }

    /// Open the local store at `cache_dir` and connect the HTTP remote.
    ///
    /// Fails if the remote bucket does not exist.
    pub async fn connect(
        cache_dir: impl AsRef<Path>,
        remote: RemoteConfig,
        config: TieredConfig,
    ) -> Result<Self, StoreError> {
        let local = LocalStore::new(cache_dir)?;
        let remote = HttpRemote::connect(remote).await?;
        Ok(Self::new(local, Arc::new(remote), config))
    }

    pub fn min_upload_size(&self) -> u64 {
        self.min_upload_size
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Look the action up remotely and promote a valid hit into the local store.
    async fn fetch_and_promote(&self, action: &ActionKey) -> Option<CacheHit> {
        let key = action_key(action);

        let mut remote_obj = match self.remote.fetch(&key).await {
            Ok(Some(obj)) => obj,
            Ok(None) => return None,
            Err(e) => {
                debug!(action = %action, error = %e, "remote fetch failed, treating as miss");
                return None;
            }
        };

        let Some(object) = remote_obj.object_id().and_then(ObjectKey::from_hex) else {
            debug!(action = %action, "remote entry has no valid object id");
            return None;
        };
        let Some(size) = remote_obj.size() else {
            debug!(action = %action, "remote entry has no valid size");
            return None;
        };

        match self
            .local
            .store_verified(action, &object, &mut remote_obj.body, size)
            .await
        {
            Ok(Some(stored)) => {
                debug!(action = %action, size, "promoted remote entry");
                Some(CacheHit {
                    object,
                    disk_path: stored.disk_path,
                })
            }
            Ok(None) => {
                debug!(action = %action, size, "remote entry size mismatch");
                None
            }
            Err(e) => {
                warn!(action = %action, error = %e, "failed to promote remote entry");
                None
            }
        }
    }
}

#[async_trait]
impl Provider for TieredStore {
    async fn get(&self, action: &ActionKey) -> Result<Option<CacheHit>, StoreError> {
        if let Some(hit) = self.local.get(action).await? {
            return Ok(Some(hit));
        }
        Ok(self.fetch_and_promote(action).await)
    }

    async fn put(
        &self,
        action: &ActionKey,
        object: &ObjectKey,
        body: Body<'_>,
    ) -> Result<PathBuf, StoreError> {
        let disk_path = self.local.put(action, object, body).await?;

        let size = tokio::fs::metadata(&disk_path)
            .await
            .map_err(StoreError::at(&disk_path))?
            .len();

        if size < self.min_upload_size {
            return Ok(disk_path);
        }

        let file = File::open(&disk_path)
            .await
            .map_err(StoreError::at(&disk_path))?;
        let metadata = HashMap::from([
            (OBJECT_ID_KEY.to_string(), object.to_hex()),
            (SIZE_KEY.to_string(), size.to_string()),
        ]);

        self.remote
            .upload(&action_key(action), metadata, Box::new(file), size)
            .await?;
        debug!(action = %action, size, "uploaded entry to remote tier");

        Ok(disk_path)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.local.close().await?;
        self.remote.close().await?;
        Ok(())
    }
}
