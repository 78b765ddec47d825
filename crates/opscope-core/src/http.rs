use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{OpsError, Result};

pub(crate) const USER_AGENT: &str = concat!("opscope/", env!("CARGO_PKG_VERSION"));

/// Statuses worth retrying; everything else fails the attempt immediately.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// A non-success response the caller wants to inspect rather than fail on,
/// e.g. the auth endpoint's XML error envelopes.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shared HTTP transport: one pooled client, a fixed pause between requests,
/// and bounded retry with exponential backoff on transient failures.
pub struct RetryingClient {
    client: reqwest::Client,
    inter_request_pause: Duration,
    backoff_base: Duration,
    max_attempts: u32,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RetryingClient {
    pub fn new(
        timeout: Duration,
        inter_request_pause: Duration,
        backoff_base: Duration,
        max_attempts: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            inter_request_pause,
            backoff_base,
            max_attempts: max_attempts.max(1),
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.inter_request_pause {
                sleep(self.inter_request_pause - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn backoff(&self, attempt: u32) {
        sleep(self.backoff_base * 2u32.pow(attempt)).await;
    }

    /// GET returning the body on success; retries exhaust into a classified
    /// error (429 -> `RateLimit`, 5xx -> `HttpStatus`, timed out -> `Timeout`).
    pub async fn get(&self, url: &str, headers: HeaderMap) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            self.pace().await;
            match self.client.get(url).headers(headers.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return response.text().await.map_err(OpsError::Http);
                    }
                    if RETRYABLE_STATUSES.contains(&status) && attempt + 1 < self.max_attempts {
                        debug!("HTTP {status} from {url}, retrying");
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_status(url, status));
                }
                Err(error) => {
                    if is_retryable_error(&error) && attempt + 1 < self.max_attempts {
                        debug!("transport error for {url}, retrying: {error}");
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_transport_error(url, error));
                }
            }
        }
    }

    /// Form-encoded POST with HTTP Basic credentials. Transient failures are
    /// retried like `get`, but the final response is handed back raw even
    /// when non-success, so the caller can inspect error envelopes.
    pub async fn post_form(
        &self,
        url: &str,
        username: &str,
        password: &str,
        params: &[(&str, &str)],
    ) -> Result<RawResponse> {
        let mut attempt = 0u32;
        loop {
            self.pace().await;
            let request = self
                .client
                .post(url)
                .basic_auth(username, Some(password))
                .form(params);
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RETRYABLE_STATUSES.contains(&status) && attempt + 1 < self.max_attempts {
                        debug!("HTTP {status} from {url}, retrying");
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let body = response.text().await.map_err(OpsError::Http)?;
                    return Ok(RawResponse {
                        status,
                        content_type,
                        body,
                    });
                }
                Err(error) => {
                    if is_retryable_error(&error) && attempt + 1 < self.max_attempts {
                        debug!("transport error for {url}, retrying: {error}");
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_transport_error(url, error));
                }
            }
        }
    }
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn classify_status(url: &str, status: u16) -> OpsError {
    match status {
        429 => OpsError::RateLimit {
            url: url.to_string(),
        },
        _ => OpsError::HttpStatus {
            url: url.to_string(),
            status,
        },
    }
}

fn classify_transport_error(url: &str, error: reqwest::Error) -> OpsError {
    if error.is_timeout() {
        OpsError::Timeout {
            url: url.to_string(),
        }
    } else {
        OpsError::Http(error)
    }
}
