// src/ingest/fetch.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};

use crate::error::{ConfigError, FetchError};
use crate::ingest::config::IngestSettings;
use crate::ingest::types::{RawDocument, Source};

/// Whatever came back over the wire, regardless of status.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A single GET. Errors only for network-level failures; HTTP statuses are data.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, FetchError>;

    /// Like [`get`](Transport::get), but fails with [`FetchError::TooLarge`]
    /// once the body exceeds `max_bytes`. Streaming transports should stop
    /// reading at that point.
    async fn get_limited(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<TransportResponse, FetchError> {
        let resp = self.get(url, timeout).await?;
        if resp.body.len() > max_bytes {
            return Err(too_large(url, max_bytes));
        }
        Ok(resp)
    }
}

fn too_large(url: &str, limit: usize) -> FetchError {
    FetchError::TooLarge {
        url: url.to_string(),
        limit,
    }
}

/// reqwest-backed transport used in production.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .build()
            .map_err(|e| ConfigError::invalid_setting("ingest.user_agent", e.to_string()))?;
        Ok(Self { client })
    }
}

fn classify_reqwest(url: &str, timeout: Duration, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else if e.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(url, timeout, e))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| classify_reqwest(url, timeout, e))?;
        Ok(TransportResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }

    async fn get_limited(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<TransportResponse, FetchError> {
        let mut resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(url, timeout, e))?;
        if resp.content_length().is_some_and(|n| n > max_bytes as u64) {
            return Err(too_large(url, max_bytes));
        }
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| classify_reqwest(url, timeout, e))?
        {
            if body.len() + chunk.len() > max_bytes {
                return Err(too_large(url, max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub asset_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&IngestSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(s: &IngestSettings) -> Self {
        Self {
            request_timeout: Duration::from_secs(s.request_timeout_secs),
            asset_timeout: Duration::from_secs(s.asset_timeout_secs),
            max_retries: s.max_retries,
            backoff_base: Duration::from_millis(s.backoff_base_ms),
        }
    }

    /// Wait before retry number `attempt` (0-based): base, 2*base, 4*base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(10))
    }
}

pub const DEFAULT_MAX_ASSET_BYTES: usize = 10 * 1024 * 1024;

/// Feed and asset retrieval on top of a [`Transport`].
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    max_asset_bytes: usize,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            max_asset_bytes: DEFAULT_MAX_ASSET_BYTES,
        }
    }

    pub fn with_max_asset_bytes(mut self, max_asset_bytes: usize) -> Self {
        self.max_asset_bytes = max_asset_bytes;
        self
    }

    /// Production fetcher: reqwest transport configured from `[ingest]`.
    pub fn from_settings(s: &IngestSettings) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(&s.user_agent)?;
        Ok(Self::new(Arc::new(transport), RetryPolicy::from_settings(s))
            .with_max_asset_bytes(s.max_asset_bytes))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch a source's feed document, retrying transient failures with backoff.
    pub async fn fetch(&self, source: &Source) -> Result<RawDocument, FetchError> {
        let t0 = Instant::now();
        let mut attempt: u32 = 0;
        let result = loop {
            match self.get_once(&source.url, self.policy.request_timeout, None).await {
                Ok(resp) => break Ok(resp),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let wait = self.policy.backoff(attempt);
                    tracing::debug!(
                        target: "ingest",
                        source = %source.id,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient fetch failure, retrying"
                    );
                    counter!("ingest_fetch_retries_total").increment(1);
                    attempt += 1;
                    tokio::time::sleep(wait).await;
                }
                Err(e) => break Err(e),
            }
        };
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let resp = result?;
        Ok(RawDocument {
            source_id: source.id.clone(),
            fetched_at: Utc::now(),
            body: resp.body,
            content_type: resp.content_type,
            status: resp.status,
        })
    }

    /// Best-effort asset download: shorter timeout, no retry, size-capped.
    pub async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.get_once(url, self.policy.asset_timeout, Some(self.max_asset_bytes))
            .await
            .map(|resp| resp.body)
    }

    async fn get_once(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: Option<usize>,
    ) -> Result<TransportResponse, FetchError> {
        let call = async {
            match max_bytes {
                Some(limit) => self.transport.get_limited(url, timeout, limit).await,
                None => self.transport.get(url, timeout).await,
            }
        };
        // Bound the call even if the transport ignores its timeout argument.
        let resp = match tokio::time::timeout(timeout, call).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout,
                })
            }
        };
        if !(200..300).contains(&resp.status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status,
            });
        }
        Ok(resp)
    }
}
