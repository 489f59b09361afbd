// src/http.rs
//! Outbound HTTP for feeds, article pages and images.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::errors::RelayError;
use crate::retry::{with_retry, RetryPolicy};

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; dz-news-relay/0.1)";

/// Cooldown used when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Anything that can hand back a page body for a URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, RelayError>;
}

/// Downloaded binary body plus its declared content type.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Download, RelayError>;
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, policy })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn get_once(&self, url: &str) -> Result<reqwest::Response, RelayError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Transient(format!("GET {url}: {e}")))?;
        classify_status(url, resp)
    }
}

/// 429 -> rate limit, 5xx -> transient, other non-success -> permanent for this URL.
fn classify_status(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
        return Err(RelayError::RateLimit { retry_after: wait });
    }
    if status.is_server_error() {
        return Err(RelayError::Transient(format!("GET {url}: HTTP {status}")));
    }
    Err(RelayError::source_fetch(url, format!("HTTP {status}")))
}

#[async_trait]
impl PageSource for HttpClient {
    async fn fetch_page(&self, url: &str) -> Result<String, RelayError> {
        with_retry(&self.policy, "fetch_page", || async {
            let resp = self.get_once(url).await?;
            resp.text()
                .await
                .map_err(|e| RelayError::Transient(format!("reading {url}: {e}")))
        })
        .await
    }
}

#[async_trait]
impl Downloader for HttpClient {
    async fn download(&self, url: &str) -> Result<Download, RelayError> {
        with_retry(&self.policy, "download", || async {
            let resp = self.get_once(url).await?;
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| RelayError::Transient(format!("reading {url}: {e}")))?;
            Ok(Download {
                bytes: bytes.to_vec(),
                content_type,
            })
        })
        .await
    }
}
