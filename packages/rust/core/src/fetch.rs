//! Content retrieval for URL ingestion.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use learnbits_shared::{LearnBitsError, Result};

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("LearnBits/", env!("CARGO_PKG_VERSION"));

/// Source of raw document bodies. The pipeline never performs I/O itself.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// [`ContentFetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LearnBitsError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LearnBitsError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LearnBitsError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LearnBitsError::Network(format!("{url}: {e}")))?;
        debug!(bytes = body.len(), "fetched");
        Ok(body)
    }
}
