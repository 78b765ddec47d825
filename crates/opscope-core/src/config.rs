use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OpsError, Result};

pub const DEFAULT_AUTH_URL: &str = "https://ops.epo.org/3.2/auth/accesstoken";
pub const DEFAULT_OPS_BASE_URL: &str = "https://ops.epo.org/3.2/rest-services";
pub const DEFAULT_ESPACENET_URL: &str = "https://worldwide.espacenet.com/patent/search";

/// Tunables for the OPS clients.
///
/// The pause and backoff values are rate-limit accommodations expected by the
/// service, not correctness requirements, so they live here rather than as
/// hard-coded constants.
#[derive(Debug, Clone)]
pub struct OpsConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub auth_url: String,
    pub ops_base_url: String,
    pub espacenet_url: String,
    pub token_cache_path: PathBuf,
    /// Per-request timeout for metadata and fallback calls.
    pub request_timeout: Duration,
    /// Pause inserted before every outbound request.
    pub inter_request_pause: Duration,
    /// Base delay for exponential retry backoff.
    pub backoff_base: Duration,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Concurrent in-flight resolutions during batch processing.
    pub concurrency: usize,
}

impl OpsConfig {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            ops_base_url: DEFAULT_OPS_BASE_URL.to_string(),
            espacenet_url: DEFAULT_ESPACENET_URL.to_string(),
            token_cache_path: default_token_cache_path(),
            request_timeout: Duration::from_secs(15),
            inter_request_pause: Duration::from_millis(100),
            backoff_base: Duration::from_millis(300),
            max_attempts: 3,
            concurrency: 5,
        }
    }

    /// Read credentials from the process environment. Their absence is a
    /// fatal startup condition, raised before any network activity.
    pub fn from_env() -> Result<Self> {
        let key = env_first(["OPSCOPE_CONSUMER_KEY", "EPO_CONSUMER_KEY"]);
        let secret = env_first(["OPSCOPE_CONSUMER_SECRET", "EPO_CONSUMER_SECRET"]);
        match (key, secret) {
            (Some(key), Some(secret)) => Ok(Self::new(key, secret)),
            _ => Err(OpsError::MissingCredentials),
        }
    }
}

fn default_token_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("opscope")
        .join("token.json")
}

fn env_first<const N: usize>(keys: [&str; N]) -> Option<String> {
    keys.into_iter()
        .find_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
