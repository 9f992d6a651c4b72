//! Custom error types for the snapshot engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid backup options: {0}")]
    InvalidOptions(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("No data available: {0}")]
    NoDataAvailable(String),
}

/// Failure of a single binary fetch, after retries are exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("timed out fetching {url}")]
    Timeout { url: String },
}

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    HttpStatus,
    Timeout,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } => FetchErrorKind::Network,
            FetchError::HttpStatus { .. } => FetchErrorKind::HttpStatus,
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Network { url, .. }
            | FetchError::HttpStatus { url, .. }
            | FetchError::Timeout { url } => url,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
