//! Result download.
//!
//! [`RemoteFetcher`] dereferences a [`ResultLocator`] through a
//! [`Downloader`] and hands the bytes to the [`ArtifactStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use super::store::{ArtifactStore, PersistedArtifact};
use crate::error::FetchError;
use crate::generation::ResultLocator;
use crate::pipeline::TaskUnit;

/// Fixed timeout for one download.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Retrieves the bytes behind a locator.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Performs one download. No retries.
    async fn download(&self, locator: &ResultLocator) -> Result<Vec<u8>, FetchError>;
}

/// HTTP GET downloader.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// Creates a downloader whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::ClientSetup(e.to_string()))?;
        Ok(Self { client })
    }

    /// Creates a downloader on top of an existing `reqwest::Client`.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, locator: &ResultLocator) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(locator.as_str())
            .send()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: locator.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Downloads results and persists them under the batch directory.
pub struct RemoteFetcher {
    downloader: Arc<dyn Downloader>,
    store: Arc<ArtifactStore>,
}

impl RemoteFetcher {
    /// Creates a fetcher.
    pub fn new(downloader: Arc<dyn Downloader>, store: Arc<ArtifactStore>) -> Self {
        Self { downloader, store }
    }

    /// Downloads `locator` and writes it into the unit's batch directory.
    pub async fn fetch(
        &self,
        locator: &ResultLocator,
        unit: &TaskUnit,
    ) -> Result<PersistedArtifact, FetchError> {
        let bytes = self.downloader.download(locator).await?;
        let artifact = self.store.persist(unit, &bytes).await?;

        info!(
            path = %artifact.path.display(),
            bytes = artifact.bytes_written,
            "Saved artifact"
        );
        Ok(artifact)
    }
}
