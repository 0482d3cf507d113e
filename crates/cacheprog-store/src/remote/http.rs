//! S3-compatible HTTP remote store.
//!
//! Uses path-style addressing (`{endpoint}/{bucket}/{key}`) and carries the
//! entry metadata in `x-amz-meta-*` headers. Credentials are passed through
//! opaquely as a bearer token.

use std::collections::HashMap;
use std::io;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use super::{RemoteObject, RemoteStore, UploadBody};
use crate::error::RemoteError;

const META_PREFIX: &str = "x-amz-meta-";
const INSTANCE_ID_HEADER: &str = "ibm-service-instance-id";

/// Connection parameters for the remote tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the object store service.
    pub endpoint: String,
    pub bucket: String,
    /// Opaque token sent as `Authorization: Bearer <token>`.
    pub api_key: Option<String>,
    pub resource_instance_id: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra attempts for failed reads.
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            api_key: None,
            resource_instance_id: None,
            timeout_secs: 5,
            max_retries: 2,
        }
    }
}

/// Remote store speaking plain HTTP to an S3-compatible service.
pub struct HttpRemote {
    config: RemoteConfig,
    /// Dropped on close to release pooled connections.
    client: RwLock<Option<Client>>,
}

impl HttpRemote {
    /// Build a client without contacting the service.
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        if config.endpoint.trim().is_empty() {
            return Err(RemoteError::Config("endpoint cannot be empty".to_string()));
        }
        if config.bucket.trim().is_empty() {
            return Err(RemoteError::Config("bucket cannot be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            config,
            client: RwLock::new(Some(client)),
        })
    }

    /// Build a client and verify that the configured bucket exists.
    pub async fn connect(config: RemoteConfig) -> Result<Self, RemoteError> {
        let remote = Self::new(config)?;
        remote.verify_bucket().await?;
        Ok(remote)
    }

    async fn verify_bucket(&self) -> Result<(), RemoteError> {
        let url = self.bucket_url();
        let response = self
            .send_with_retry(|client| self.request(client, Method::HEAD, &url))
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RemoteError::BucketNotFound(self.config.bucket.clone())),
            s => Err(RemoteError::Status {
                status: s.as_u16(),
                url,
            }),
        }
    }

    fn bucket_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), key)
    }

    fn client(&self) -> Result<Client, RemoteError> {
        self.client
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(RemoteError::Closed)
    }

    fn request(&self, client: &Client, method: Method, url: &str) -> RequestBuilder {
        let mut builder = client.request(method, url);
        if let Some(token) = &self.config.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(instance) = &self.config.resource_instance_id {
            builder = builder.header(INSTANCE_ID_HEADER, instance);
        }
        builder
    }

    /// Send an idempotent request, retrying transport errors and 5xx.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, RemoteError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = self.client()?;
        let mut attempt = 0u32;

        loop {
            let result = build(&client).send().await;
            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            };

            if !retryable || attempt >= self.config.max_retries {
                return Ok(result?);
            }

            attempt += 1;
            match &result {
                Ok(response) => warn!(status = %response.status(), attempt, "retrying remote request"),
                Err(e) => warn!(error = %e, attempt, "retrying remote request"),
            }
            tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
        }
    }
}

/// Collect `x-amz-meta-*` headers with the prefix stripped.
fn metadata_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch(&self, key: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let url = self.object_url(key);
        let response = self
            .send_with_retry(|client| self.request(client, Method::GET, &url))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(key, "remote object not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let metadata = metadata_from_headers(response.headers());
        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Some(RemoteObject {
            metadata,
            body: Box::new(StreamReader::new(Box::pin(stream))),
        }))
    }

    async fn upload(
        &self,
        key: &str,
        metadata: HashMap<String, String>,
        body: UploadBody,
        len: u64,
    ) -> Result<(), RemoteError> {
        let client = self.client()?;
        let url = self.object_url(key);

        let mut builder = self
            .request(&client, Method::PUT, &url)
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)));
        for (name, value) in &metadata {
            builder = builder.header(format!("{}{}", META_PREFIX, name), value);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if let Ok(mut guard) = self.client.write() {
            guard.take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(endpoint: &str) -> RemoteConfig {
        RemoteConfig {
            endpoint: endpoint.to_string(),
            bucket: "build-cache".to_string(),
            max_retries: 0,
            ..Default::default()
        }
    }

    /// A request as seen by the test server.
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// Answer one connection per canned response, in order, and return what
    /// each request carried.
    async fn serve(responses: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<Captured>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut captured = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    if socket.read(&mut byte).await.unwrap() == 0 {
                        break;
                    }
                    head.push(byte[0]);
                }
                let head = String::from_utf8_lossy(&head).to_string();

                let len = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut body = vec![0u8; len];
                socket.read_exact(&mut body).await.unwrap();

                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                captured.push(Captured { head, body });
            }
            captured
        });

        (format!("http://{}", addr), handle)
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    }

    #[test]
    fn test_urls() {
        let remote = HttpRemote::new(config("https://s3.example.com/")).unwrap();
        assert_eq!(remote.bucket_url(), "https://s3.example.com/build-cache");
        assert_eq!(
            remote.object_url("action/6131"),
            "https://s3.example.com/build-cache/action/6131"
        );
    }

    #[test]
    fn test_new_rejects_missing_settings() {
        assert!(matches!(
            HttpRemote::new(RemoteConfig::default()),
            Err(RemoteError::Config(_))
        ));
        let mut cfg = config("https://s3.example.com");
        cfg.bucket.clear();
        assert!(matches!(HttpRemote::new(cfg), Err(RemoteError::Config(_))));
    }

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-objectid", "6f31".parse().unwrap());
        headers.insert("x-amz-meta-size", "5".parse().unwrap());
        headers.insert("content-type", "application/octet-stream".parse().unwrap());

        let meta = metadata_from_headers(&headers);
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["objectid"], "6f31");
        assert_eq!(meta["size"], "5");
    }

    #[tokio::test]
    async fn test_fetch_reads_metadata_and_body() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 200 OK\r\nx-amz-meta-objectid: 6f31\r\nx-amz-meta-size: 5\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello",
        ])
        .await;
        let mut cfg = config(&endpoint);
        cfg.api_key = Some("secret-token".to_string());
        let remote = HttpRemote::new(cfg).unwrap();

        let mut obj = remote.fetch("action/6131").await.unwrap().unwrap();
        assert_eq!(obj.object_id(), Some("6f31"));
        assert_eq!(obj.size(), Some(5));

        let mut bytes = Vec::new();
        obj.body.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"hello");

        let requests = server.await.unwrap();
        assert!(requests[0].head.starts_with("GET /build-cache/action/6131 "));
        assert_eq!(header(&requests[0].head, "authorization"), Some("Bearer secret-token"));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ])
        .await;
        let remote = HttpRemote::new(config(&endpoint)).unwrap();

        assert!(remote.fetch("action/00").await.unwrap().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_missing_bucket() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ])
        .await;

        let result = HttpRemote::connect(config(&endpoint)).await;
        assert!(matches!(result, Err(RemoteError::BucketNotFound(b)) if b == "build-cache"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nx-amz-meta-objectid: 6f31\r\nx-amz-meta-size: 2\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
        ])
        .await;
        let mut cfg = config(&endpoint);
        cfg.max_retries = 1;
        let remote = HttpRemote::new(cfg).unwrap();

        let mut obj = remote.fetch("action/6131").await.unwrap().unwrap();
        let mut bytes = Vec::new();
        obj.body.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"ok");

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.head.starts_with("GET /build-cache/action/6131 ")));
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_max_retries() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ])
        .await;
        let remote = HttpRemote::new(config(&endpoint)).unwrap();

        let result = remote.fetch("action/6131").await;
        assert!(matches!(result, Err(RemoteError::Status { status: 500, .. })));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_sends_body_and_metadata() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ])
        .await;
        let mut cfg = config(&endpoint);
        cfg.resource_instance_id = Some("crn:instance".to_string());
        let remote = HttpRemote::new(cfg).unwrap();

        let metadata = HashMap::from([
            ("objectid".to_string(), "6f31".to_string()),
            ("size".to_string(), "5".to_string()),
        ]);
        let body: UploadBody = Box::new(std::io::Cursor::new(b"hello".to_vec()));
        remote.upload("action/6131", metadata, body, 5).await.unwrap();

        let requests = server.await.unwrap();
        let head = &requests[0].head;
        assert!(head.starts_with("PUT /build-cache/action/6131 "));
        assert_eq!(header(head, "content-length"), Some("5"));
        assert_eq!(header(head, "x-amz-meta-objectid"), Some("6f31"));
        assert_eq!(header(head, "x-amz-meta-size"), Some("5"));
        assert_eq!(header(head, "ibm-service-instance-id"), Some("crn:instance"));
        assert_eq!(requests[0].body, b"hello");
    }

    #[tokio::test]
    async fn test_upload_rejected_status() {
        let (endpoint, server) = serve(vec![
            "HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ])
        .await;
        let remote = HttpRemote::new(config(&endpoint)).unwrap();

        let body: UploadBody = Box::new(std::io::Cursor::new(b"hello".to_vec()));
        let result = remote.upload("action/6131", HashMap::new(), body, 5).await;
        assert!(matches!(
            result,
            Err(RemoteError::Status { status: 403, ref url }) if url.ends_with("/build-cache/action/6131")
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let remote = HttpRemote::new(config("http://127.0.0.1:9")).unwrap();
        remote.close().await.unwrap();
        assert!(matches!(remote.fetch("action/00").await, Err(RemoteError::Closed)));
    }
}
