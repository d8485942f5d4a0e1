//! Remote blob source
//!
//! Reads blobs from an HTTP object host that mirrors the local sharded layout:
//! `GET <base_url>/<s1>/<s2>/<s3>/<digest>`. Bodies are streamed straight
//! through to the caller.

use crate::config::RemoteConfig;
use crate::error::{AppError, Result};
use crate::storage::traits::{BlobReader, BlobSource};
use crate::storage::ContentDigest;
use crate::utils::retry::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::debug;

/// [`BlobSource`] backed by an HTTP object host
#[derive(Debug, Clone)]
pub struct RemoteBlobSource {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl RemoteBlobSource {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
            retry,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay_ms: config.base_delay_ms,
                max_delay_ms: config.max_delay_ms,
            },
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Location of a blob on the remote host
    pub fn object_url(&self, digest: &ContentDigest) -> Result<Url> {
        self.base_url
            .join(&digest.shard_key())
            .map_err(|e| AppError::Internal(format!("Failed to build object URL: {}", e)))
    }

    /// Fetch an object by its key relative to the base URL
    pub async fn fetch(&self, key: &str) -> Result<BlobReader> {
        let (reader, _) = self.fetch_with_len(key).await?;
        Ok(reader)
    }

    /// Like [`fetch`](Self::fetch), also returning the advertised `Content-Length`
    pub async fn fetch_with_len(&self, key: &str) -> Result<(BlobReader, Option<u64>)> {
        let url = self
            .base_url
            .join(key)
            .map_err(|e| AppError::InvalidPath(format!("{}: {}", key, e)))?;

        retry_transient("remote_fetch", &self.retry, || self.fetch_once(&url)).await
    }

    async fn fetch_once(&self, url: &Url) -> Result<(BlobReader, Option<u64>)> {
        debug!(url = %url, "Fetching remote object");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::remote_error(format!("GET {} failed: {}", url, e), None))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("remote object {}", url)));
        }
        if !status.is_success() {
            return Err(AppError::remote_error(
                format!("GET {} returned {}", url, status),
                Some(status.as_u16()),
            ));
        }

        let len = response.content_length();
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok((Box::pin(StreamReader::new(body)), len))
    }
}

#[async_trait]
impl BlobSource for RemoteBlobSource {
    async fn open(&self, digest: &ContentDigest) -> Result<BlobReader> {
        self.fetch(&digest.shard_key()).await
    }

    async fn open_with_len(&self, digest: &ContentDigest) -> Result<(BlobReader, Option<u64>)> {
        self.fetch_with_len(&digest.shard_key()).await
    }
}

/// `Url::join` drops the last path segment unless the base ends with `/`
fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| AppError::Config(format!("Invalid remote base URL {}: {}", raw, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
