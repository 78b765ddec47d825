//! Access-token lifecycle: durable cache plus client-credentials exchange.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::OpsConfig;
use crate::error::{OpsError, Result};
use crate::extract::error_envelope_message;
use crate::http::RetryingClient;

/// Refresh this long before the advertised expiry so a token never lapses
/// mid-request.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

impl CachedToken {
    fn usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry - TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Durable, process-crossing cache: one JSON file holding `{token, expiry}`.
/// An absent or corrupt file is simply "no cached token".
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted token, discarding it when already expired.
    pub fn load(&self) -> Option<CachedToken> {
        let data = std::fs::read(&self.path).ok()?;
        let cached: CachedToken = serde_json::from_slice(&data).ok()?;
        (cached.expiry > Utc::now()).then_some(cached)
    }

    /// Plain overwrite; latest write wins. Callers serialize writes through
    /// the refresh lock.
    pub fn save(&self, token: &CachedToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OpsError::Cache(format!("creating {}: {e}", parent.display())))?;
        }
        let data = serde_json::to_vec(token)
            .map_err(|e| OpsError::Cache(format!("serializing token: {e}")))?;
        std::fs::write(&self.path, data)
            .map_err(|e| OpsError::Cache(format!("writing {}: {e}", self.path.display())))
    }
}

/// Process-wide authority for the OPS bearer credential. Shared behind an
/// `Arc` by every resolver; the check-and-refresh sequence runs under one
/// lock so concurrent callers cannot issue parallel exchanges.
pub struct TokenManager {
    auth_url: String,
    consumer_key: String,
    consumer_secret: String,
    http: RetryingClient,
    store: TokenStore,
    state: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(config: &OpsConfig) -> Result<Self> {
        // The auth endpoint is exempt from the metadata pacing pause but
        // still bounded by the shared request timeout and retry budget.
        let http = RetryingClient::new(
            config.request_timeout,
            Duration::ZERO,
            config.backoff_base,
            config.max_attempts,
        )?;
        let store = TokenStore::new(&config.token_cache_path);
        let state = Mutex::new(store.load());
        Ok(Self {
            auth_url: config.auth_url.clone(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            http,
            store,
            state,
        })
    }

    /// Return a bearer token valid for at least one outbound request,
    /// refreshing through the authority when none is held or the held one is
    /// inside the safety margin.
    pub async fn get_valid_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref()
            && cached.usable(Utc::now())
        {
            return Ok(cached.token.clone());
        }

        let fresh = self.refresh().await?;
        if let Err(err) = self.store.save(&fresh) {
            warn!("failed to persist token cache: {err}");
        }
        let token = fresh.token.clone();
        *state = Some(fresh);
        Ok(token)
    }

    async fn refresh(&self) -> Result<CachedToken> {
        debug!("refreshing OPS access token");
        let response = self
            .http
            .post_form(
                &self.auth_url,
                &self.consumer_key,
                &self.consumer_secret,
                &[("grant_type", "client_credentials")],
            )
            .await?;

        // The authority answers errors with an XML envelope even though the
        // happy path is JSON.
        if response.content_type.to_ascii_lowercase().contains("xml") {
            let message = error_envelope_message(&response.body)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(OpsError::Auth(format!("EPO API Error: {message}")));
        }
        if !response.is_success() {
            return Err(OpsError::Auth(format!(
                "failed to obtain token: {}",
                response.body
            )));
        }

        let value: Value = serde_json::from_str(&response.body)
            .map_err(|_| OpsError::Auth(format!("unexpected response format: {}", response.body)))?;
        let token = value["access_token"].as_str().ok_or_else(|| {
            OpsError::Auth(format!("unexpected response format: {}", response.body))
        })?;
        let expires_in = parse_expires_in(&value).ok_or_else(|| {
            OpsError::Auth(format!("unexpected response format: {}", response.body))
        })?;

        Ok(CachedToken {
            token: token.to_string(),
            expiry: Utc::now() + TimeDelta::seconds(expires_in),
        })
    }
}

/// The authority serializes `expires_in` as a number or a numeric string,
/// depending on the endpoint variant.
fn parse_expires_in(value: &Value) -> Option<i64> {
    match &value["expires_in"] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
