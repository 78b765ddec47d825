use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("missing OPS credentials: set OPSCOPE_CONSUMER_KEY and OPSCOPE_CONSUMER_SECRET")]
    MissingCredentials,

    #[error("auth error: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("rate limited by {url}")]
    RateLimit { url: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("token cache error: {0}")]
    Cache(String),

    #[error("invalid document identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, OpsError>;
