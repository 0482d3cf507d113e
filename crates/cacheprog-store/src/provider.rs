//! The storage capability the engine talks to.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::StoreError;
use crate::keys::{ActionKey, ObjectKey};

/// Commands every provider in this crate supports.
pub const KNOWN_COMMANDS: &[&str] = &["get", "put", "close"];

/// Readable body handed to [`Provider::put`].
pub type Body<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// A cache entry that was found and validated.
///
/// The object file exists at `disk_path` and its size matched the recorded
/// size when it was looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub object: ObjectKey,
    pub disk_path: PathBuf,
}

/// A cache backend.
///
/// Implementations report absent or inconsistent entries as `Ok(None)`;
/// errors are reserved for failures the session cannot recover from.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Command names advertised in the handshake.
    fn known_commands(&self) -> Vec<String> {
        KNOWN_COMMANDS.iter().map(|c| c.to_string()).collect()
    }

    async fn get(&self, action: &ActionKey) -> Result<Option<CacheHit>, StoreError>;

    /// Store `body` as the object for `action` and return its absolute path.
    async fn put(
        &self,
        action: &ActionKey,
        object: &ObjectKey,
        body: Body<'_>,
    ) -> Result<PathBuf, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}
