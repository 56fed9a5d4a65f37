//! HTTP fetcher backed by reqwest.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Duration;

use super::fetch::{Document, FetchError, FetchKind, FetchRequest, FetchResponse, Fetcher};
use crate::config::FetchConfig;

/// Shared HTTP client with sensible defaults
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Arc<Client>,
}

impl HttpFetcher {
    /// Create a fetcher with default settings
    pub fn new() -> Result<Self, FetchError> {
        Self::from_config(&FetchConfig::default())
    }

    /// Create a fetcher from the `[fetch]` configuration section
    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(proxy) = config.proxy.as_deref() {
            let proxy = Proxy::all(proxy)
                .map_err(|e| FetchError::Network(format!("Invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
            tracing::debug!("Routing requests through configured proxy");
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut builder = self.client.get(&request.url);
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        match request.kind {
            FetchKind::Html => {
                let html = response.text().await?;
                Ok(FetchResponse::Html(Document::new(&request.url, html)))
            }
            FetchKind::Bytes => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let data = response.bytes().await?.to_vec();
                Ok(FetchResponse::Bytes { data, content_type })
            }
        }
    }
}
