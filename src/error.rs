//! Error types surfaced by the harvesting pipeline

use thiserror::Error;

/// Failure of a single outbound page fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },
}

impl FetchError {
    /// Connection failures, timeouts and 5xx responses are worth another try.
    /// 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500,
        }
    }
}

/// Errors a caller of the pipeline can observe.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    /// The start page could not be fetched, even after retries.
    #[error("failed to fetch start page {url}")]
    StartPage {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type HarvestResult<T> = Result<T, HarvestError>;
