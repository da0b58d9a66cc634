//! Subscription feed download

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument};

use crate::error::{PanelError, Result};

/// Timeout for a whole feed download
pub const FEED_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of raw subscription feed text
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the feed body for `url`
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches feeds over HTTP(S)
#[derive(Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| PanelError::Internal(format!("Failed to build feed client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PanelError::Network(format!("subscription download failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(PanelError::FeedStatus {
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PanelError::Network(format!("subscription read failed: {}", e)))?;

        debug!("Fetched {} bytes of subscription feed", body.len());
        Ok(body)
    }
}
