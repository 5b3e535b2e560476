use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Application-wide error types for railtime.
#[derive(Error, Debug)]
pub enum AppError {
    /// Connection-level failure (refused, reset, DNS).
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Upstream answered 429.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Upstream answered 5xx.
    #[error("Upstream server error (HTTP {status}) for {url}")]
    Server { status: u16, url: String },

    /// Non-retryable request failure: 4xx other than 429, malformed URL.
    #[error("Client error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Client { status: Option<u16>, message: String },

    /// Expected HTML structure absent or a field could not be coerced.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Constraint violation or storage failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The listing stage failed; nothing to process.
    #[error("Listing stage failed: {0}")]
    Fatal(Box<AppError>),

    /// Invalid configuration (selectors, env vars).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Work was abandoned because the run was cancelled.
    #[error("Cancelled before processing")]
    Cancelled,
}

/// Coarse error classification reported in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "NetworkError")]
    Network,
    #[serde(rename = "ClientError")]
    Client,
    #[serde(rename = "ParseError")]
    Parse,
    #[serde(rename = "PersistenceError")]
    Persistence,
    #[serde(rename = "FatalError")]
    Fatal,
    #[serde(rename = "ConfigError")]
    Config,
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::Client => "ClientError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Persistence => "PersistenceError",
            ErrorKind::Fatal => "FatalError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network(_)
                | AppError::Timeout(_)
                | AppError::RateLimited
                | AppError::Server { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Network(_)
            | AppError::Timeout(_)
            | AppError::RateLimited
            | AppError::Server { .. } => ErrorKind::Network,
            AppError::Client { .. } => ErrorKind::Client,
            AppError::Parse(_) => ErrorKind::Parse,
            AppError::Persistence(_) => ErrorKind::Persistence,
            AppError::Fatal(_) => ErrorKind::Fatal,
            AppError::Config(_) => ErrorKind::Config,
            AppError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Wrap a listing-stage failure. Already-fatal errors are not nested twice.
    pub fn fatal(inner: AppError) -> Self {
        match inner {
            AppError::Fatal(_) => inner,
            other => AppError::Fatal(Box::new(other)),
        }
    }
}
