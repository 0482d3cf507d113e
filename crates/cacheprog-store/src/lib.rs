//! Cache storage for the cacheprog coordinator.
//!
//! Two tiers share one [`Provider`] interface:
//! - [`LocalStore`]: content-addressed files under a cache directory
//! - [`TieredStore`]: the local store backed by a [`RemoteStore`]
//!
//! Keys are opaque byte strings; they are hex-encoded wherever they become
//! file or object names.

pub mod error;
pub mod keys;
pub mod local;
pub mod provider;
pub mod remote;
pub mod tiered;

pub use error::{RemoteError, StoreError};
pub use keys::{ActionKey, ObjectKey};
pub use local::{CacheEntry, LocalStore, StoredObject};
pub use provider::{Body, CacheHit, Provider, KNOWN_COMMANDS};
pub use remote::{HttpRemote, MemoryRemote, RemoteConfig, RemoteObject, RemoteStore};
pub use tiered::{TieredConfig, TieredStore, DEFAULT_MIN_UPLOAD_SIZE};
