//! Remote object store tier.
//!
//! Entries are stored under `action/<action-hex>` with the object key and
//! size attached as object metadata. The tier only has to fetch, upload and
//! release its connections; everything else is decided by
//! [`TieredStore`](crate::TieredStore).

mod http;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::RemoteError;
use crate::keys::ActionKey;

pub use http::{HttpRemote, RemoteConfig};
pub use memory::MemoryRemote;

/// Metadata field carrying the object key (hex).
pub const OBJECT_ID_KEY: &str = "objectid";
/// Metadata field carrying the object size in bytes.
pub const SIZE_KEY: &str = "size";

/// Remote object name for an action.
pub fn action_key(action: &ActionKey) -> String {
    format!("action/{}", action.to_hex())
}

/// Streaming body of a fetched object.
pub type RemoteBody = Box<dyn AsyncRead + Send + Unpin>;

/// Upload source; uploads are always re-read from the local object file.
pub type UploadBody = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// A fetched remote object.
pub struct RemoteObject {
    pub metadata: HashMap<String, String>,
    pub body: RemoteBody,
}

impl RemoteObject {
    /// The `objectid` metadata value, if present.
    pub fn object_id(&self) -> Option<&str> {
        self.metadata.get(OBJECT_ID_KEY).map(String::as_str)
    }

    /// The `size` metadata value, if present and numeric.
    pub fn size(&self) -> Option<u64> {
        self.metadata.get(SIZE_KEY)?.trim().parse().ok()
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch `key`. An absent object is `Ok(None)`.
    async fn fetch(&self, key: &str) -> Result<Option<RemoteObject>, RemoteError>;

    /// Upload `len` bytes from `body` under `key` with `metadata` attached.
    async fn upload(
        &self,
        key: &str,
        metadata: HashMap<String, String>,
        body: UploadBody,
        len: u64,
    ) -> Result<(), RemoteError>;

    /// Release pooled connections. Later calls fail with [`RemoteError::Closed`].
    async fn close(&self) -> Result<(), RemoteError>;
}
