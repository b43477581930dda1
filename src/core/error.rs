//! Error types for the gateway engine.
//!
//! All fallible engine operations return [`Result<T>`]. Delivery errors carry
//! a retryable/non-retryable classification consumed by the cache flush loop:
//! retryable failures keep the batch queued, non-retryable failures drop it
//! after logging. North connectors may override the default classification
//! through `NorthConnector::should_retry`.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Gateway engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or inconsistent configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection establishment or teardown failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Durable cache storage failure.
    #[error("cache storage error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload (de)serialization failure. Never retried.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP delivery failure with a status code from the remote end.
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },

    /// Transient delivery failure (network, timeout, broker unavailable).
    #[error("delivery error: {0}")]
    Delivery(String),

    /// The sink rejected the payload permanently. Never retried.
    #[error("payload rejected: {0}")]
    Rejected(String),
}

impl EngineError {
    /// Default retryable classification for delivery failures.
    ///
    /// HTTP 408 (timeout), 429 (throttled) and all 5xx are considered
    /// transient; other 4xx statuses indicate a payload the sink will never
    /// accept. Configuration, serialization and explicit rejections are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Serialization(_) | Self::Rejected(_) => false,
            Self::Http { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            _ => true,
        }
    }
}
