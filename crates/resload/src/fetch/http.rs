//! HTTP fetcher: status mapping, conditional requests, retry.
//!
//! This is the only place that interprets status codes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_NONE_MATCH, RETRY_AFTER,
    USER_AGENT,
};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{LoadError, LoadResult};
use crate::key::ResourceKey;

use super::{FetchOutcome, Fetched, Fetcher};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

const USER_AGENT_VALUE: &str = concat!("resload/", env!("CARGO_PKG_VERSION"));

/// Fetcher that treats resource keys as `http(s)` URLs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> LoadResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| LoadError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Use a preconfigured client; `config.timeout_secs` is then ignored.
    pub fn with_client(client: reqwest::Client, config: HttpConfig) -> Self {
        Self { client, config }
    }

    pub fn from_env() -> LoadResult<Self> {
        Self::new(HttpConfig::from_env())
    }

    async fn request(&self, url: &str, etag: Option<&str>) -> LoadResult<reqwest::Response> {
        use rand::Rng;

        let mut retries = 0;
        let max_retries = self.config.max_retries;

        loop {
            match self.request_once(url, etag).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && retries < max_retries => {
                    retries += 1;

                    let backoff = match &e {
                        LoadError::RateLimited {
                            retry_after: Some(retry_after),
                        } => {
                            let capped = (*retry_after).min(MAX_BACKOFF);
                            let jitter_factor: f64 =
                                rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
                            let jittered_ms =
                                ((capped.as_millis() as f64) * jitter_factor).round() as u64;
                            Duration::from_millis(jittered_ms.max(100))
                        }
                        _ => {
                            let base_backoff = backoff_ceiling(retries);
                            let jittered_ms =
                                rand::thread_rng().gen_range(0..=base_backoff.as_millis() as u64);
                            Duration::from_millis(jittered_ms.max(10))
                        }
                    };

                    warn!(
                        error = %e,
                        retry = retries,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(&self, url: &str, etag: Option<&str>) -> LoadResult<reqwest::Response> {
        let mut request = self.client.get(url);

        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        match status.as_u16() {
            200..=299 | 304 => Ok(response),

            404 | 410 => Err(LoadError::NotFound {
                key: url.to_string(),
            }),

            429 => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(LoadError::RateLimited { retry_after })
            }

            _ => {
                let body = response.text().await.unwrap_or_default();
                let message = if body.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    format!(
                        "HTTP {}: {}",
                        status.as_u16(),
                        body.chars().take(200).collect::<String>()
                    )
                };
                Err(LoadError::Network { message })
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        key: &ResourceKey,
        freshness_token: Option<&str>,
    ) -> LoadResult<FetchOutcome> {
        let url = key.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(LoadError::InvalidKey {
                identifier: url.to_string(),
                reason: "HTTP fetcher requires an http(s) URL".to_string(),
            });
        }

        debug!(url, etag = ?freshness_token, "fetching resource");
        let response = self.request(url, freshness_token).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url, "resource not modified (304)");
            return Ok(FetchOutcome::NotModified);
        }

        let etag = header_string(response.headers(), ETAG);
        let content_type = header_string(response.headers(), CONTENT_TYPE);
        let data = response.bytes().await.map_err(|e| LoadError::Network {
            message: format!("failed to read response body: {}", e),
        })?;

        Ok(FetchOutcome::Fetched(Fetched {
            data,
            etag,
            content_type,
        }))
    }
}

/// Upper bound for the jittered backoff before retry `retry` (1-based).
fn backoff_ceiling(retry: u32) -> Duration {
    Duration::from_secs(1u64 << retry.min(5)).min(MAX_BACKOFF)
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
