//! Asset downloads

use crate::error::{AgentError, AssetError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Retrieves asset bodies by URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download the complete body at `url`
    async fn fetch(&self, url: &str) -> Result<Bytes, AssetError>;
}

/// Default cap on a downloaded asset body (512 MiB)
pub const DEFAULT_MAX_ASSET_SIZE: u64 = 512 * 1024 * 1024;

/// HTTP(S) fetcher backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_size: u64,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_size: DEFAULT_MAX_ASSET_SIZE,
        })
    }

    /// Reject bodies larger than `max_size` bytes
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, AssetError> {
        debug!("Fetching asset from {}", url);
        let download_error = |reason: String| AssetError::Download {
            url: url.to_string(),
            reason,
        };

        let too_large = |size: u64| download_error(format!("body of {} bytes exceeds the {} byte limit", size, self.max_size));

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP {}", status)));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_size {
                return Err(too_large(length));
            }
        }

        // the declared length may be absent or wrong, so the limit is enforced while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| download_error(e.to_string()))? {
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_size {
                return Err(too_large(size));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}
