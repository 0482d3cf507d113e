//! Cacheprog - external build cache program
//!
//! Serves the Go toolchain's `GOCACHEPROG` protocol on a pair of byte
//! streams, backed by a local content-addressed store and, optionally, a
//! remote object store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cacheprog::{Engine, EngineConfig};
//! use cacheprog::store::LocalStore;
//!
//! # async fn serve() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::new("/tmp/go-cache")?;
//! let engine = Engine::new(Arc::new(store), EngineConfig::default());
//! engine.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;

pub use cacheprog_protocol as protocol;
pub use cacheprog_store as store;

pub use config::{ConfigError, FileConfig, RemoteOverrides};
pub use engine::{Engine, EngineConfig, EngineError, SessionState};
