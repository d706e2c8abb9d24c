// sprout-net/src/http.rs
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use sprout_common::config::Config;
use sprout_common::error::{Result, SproutError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::validation::validate_url;

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "sprout installer (Rust)";

/// Outcome of a single failed fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchAttemptError {
    /// Timeouts, dropped connections, truncated bodies, 5xx/408/429.
    #[error("{0}")]
    Transient(String),
    /// Anything retrying cannot fix: 404, 403, invalid URL, missing file.
    #[error("{0}")]
    Permanent(String),
}

impl FetchAttemptError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchAttemptError::Transient(_))
    }
}

/// Retrieves the complete content at a URL. Implementations return either
/// every byte or an error, never a partial body.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, FetchAttemptError>> + Send;
}

/// Exponential backoff for transient fetch failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// Upper bound of random jitter added to each delay, as a fraction.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            jitter: 0.1,
        }
    }

    /// Retries without sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1,
            jitter: 0.0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::exponential(config.fetch_attempts)
    }

    /// Delay after the `failed_attempt`-th failure (1-based), without jitter.
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn delay_with_jitter(&self, failed_attempt: u32) -> Duration {
        let base = self.base_delay(failed_attempt);
        if base.is_zero() || self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::rng().random_range(0.0..self.jitter);
        base.mul_f64(1.0 + extra)
    }
}

/// Fetches `url`, retrying transient failures per `policy`. `on_retry` is
/// told about every failed attempt that will be retried.
pub async fn fetch_with_retry<F, R>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
    mut on_retry: R,
) -> Result<Vec<u8>>
where
    F: ArtifactFetcher,
    R: FnMut(u32, &FetchAttemptError),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!("Fetching {} (attempt {}/{})", url, attempt, policy.max_attempts);
        match fetcher.fetch(url).await {
            Ok(bytes) => {
                debug!("Fetched {} bytes from {}", bytes.len(), url);
                return Ok(bytes);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_with_jitter(attempt);
                warn!(
                    "Fetch attempt {}/{} for {} failed: {}. Retrying in {:?}",
                    attempt, policy.max_attempts, url, e, delay
                );
                on_retry(attempt, &e);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                let cause = if e.is_transient() {
                    format!("{e} (gave up after {attempt} attempts)")
                } else {
                    e.to_string()
                };
                return Err(SproutError::FetchFailed {
                    url: url.to_string(),
                    cause,
                });
            }
        }
    }
}

/// reqwest-backed fetcher. Also reads `file://` URLs when insecure URLs are
/// allowed.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    allow_insecure: bool,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            allow_insecure: config.allow_insecure_urls,
        })
    }
}

impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchAttemptError> {
        let parsed = validate_url(url, self.allow_insecure)
            .map_err(|e| FetchAttemptError::Permanent(e.to_string()))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| FetchAttemptError::Permanent(format!("Invalid file URL {url}")))?;
            return tokio::fs::read(&path).await.map_err(|e| {
                FetchAttemptError::Permanent(format!("Failed to read {}: {e}", path.display()))
            });
        }

        let response = self.client.get(parsed).send().await.map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            classify_reqwest_error(url, e)
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);

        if !status.is_success() {
            let msg = match status {
                StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
                StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
                other => format!("HTTP error {other}"),
            };
            return if is_transient_status(status) {
                Err(FetchAttemptError::Transient(msg))
            } else {
                Err(FetchAttemptError::Permanent(msg))
            };
        }

        let expected_len = response.content_length();
        let content = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;
        if let Some(expected) = expected_len {
            if content.len() as u64 != expected {
                return Err(FetchAttemptError::Transient(format!(
                    "Truncated body from {url}: got {} of {} bytes",
                    content.len(),
                    expected
                )));
            }
        }
        Ok(content.to_vec())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_reqwest_error(url: &str, e: reqwest::Error) -> FetchAttemptError {
    let msg = format!("Request to {url} failed: {e}");
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        FetchAttemptError::Transient(msg)
    } else {
        FetchAttemptError::Permanent(msg)
    }
}

fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    let client = Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}
