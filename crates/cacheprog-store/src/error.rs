//! Error types for the storage tiers.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from store operations.
///
/// Anything that reduces to "no valid entry" is reported as a miss instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("I/O error on {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache directory cannot be empty")]
    EmptyCacheDir,

    #[error("remote store: {0}")]
    Remote(#[from] RemoteError),
}

impl StoreError {
    pub(crate) fn at(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Path { path, source }
    }
}

/// Errors from the remote object store.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to find bucket {0:?}")]
    BucketNotFound(String),

    #[error("invalid remote configuration: {0}")]
    Config(String),

    #[error("remote store is closed")]
    Closed,
}
