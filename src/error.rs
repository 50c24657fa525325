use std::time::Duration;

use thiserror::Error;

/// Failure modes of a single retrieval attempt.
///
/// Only `Blocked`, `Timeout` and `SubprocessFailure` are expected during normal
/// operation; the chain recovers from all of them by moving on to the next
/// strategy. Nothing here is surfaced to callers of the engine entrypoints.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("proxy pool exhausted, proceeding proxy-less")]
    ProxyExhausted,

    #[error("all strategies exhausted for query {0:?}")]
    StrategyExhausted(String),

    #[error("subprocess failure: {0}")]
    SubprocessFailure(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("search api error: {0}")]
    Api(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("store error: {0}")]
    Store(String),
}

impl ScrapeError {
    /// Whether the failure means the search engine recognised us.
    pub fn is_blocked(&self) -> bool {
        matches!(self, ScrapeError::Blocked(_))
    }

    /// Whether the proxy used for the attempt should be charged a failure.
    pub fn charges_proxy(&self) -> bool {
        match self {
            ScrapeError::Blocked(_) | ScrapeError::Timeout(_) => true,
            ScrapeError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

impl From<redis::RedisError> for ScrapeError {
    fn from(e: redis::RedisError) -> Self {
        ScrapeError::Cache(e.to_string())
    }
}

impl From<sqlx::Error> for ScrapeError {
    fn from(e: sqlx::Error) -> Self {
        ScrapeError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
