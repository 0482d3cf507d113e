//! In-process remote store.
//!
//! Behaves like a remote bucket without any network, and counts calls so
//! callers can assert which paths reached the remote tier.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{RemoteObject, RemoteStore, UploadBody};
use crate::error::RemoteError;

#[derive(Debug, Clone)]
struct Stored {
    metadata: HashMap<String, String>,
    bytes: Vec<u8>,
}

/// Remote store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    objects: Mutex<HashMap<String, Stored>>,
    fetches: AtomicUsize,
    uploads: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_upload: AtomicBool,
    closed: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, bypassing upload accounting.
    pub fn insert(&self, key: &str, metadata: HashMap<String, String>, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), Stored { metadata, bytes });
        }
    }

    /// Bytes and metadata stored under `key`.
    pub fn object(&self, key: &str) -> Option<(HashMap<String, String>, Vec<u8>)> {
        let objects = self.objects.lock().ok()?;
        objects
            .get(key)
            .map(|s| (s.metadata.clone(), s.bytes.clone()))
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Make every following fetch fail as if the network were down.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make every following upload fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), RemoteError> {
        if self.is_closed() {
            return Err(RemoteError::Closed);
        }
        Ok(())
    }

    fn unavailable(what: &str) -> RemoteError {
        RemoteError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("{} unavailable", what),
        ))
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self, key: &str) -> Result<Option<RemoteObject>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable("fetch"));
        }

        Ok(self.object(key).map(|(metadata, bytes)| RemoteObject {
            metadata,
            body: Box::new(Cursor::new(bytes)),
        }))
    }

    async fn upload(
        &self,
        key: &str,
        metadata: HashMap<String, String>,
        mut body: UploadBody,
        len: u64,
    ) -> Result<(), RemoteError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Self::unavailable("upload"));
        }

        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await?;
        if bytes.len() as u64 != len {
            return Err(RemoteError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("upload body was {} bytes, expected {}", bytes.len(), len),
            )));
        }

        self.insert(key, metadata, bytes);
        Ok(())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
