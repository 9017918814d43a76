use std::time::Duration;

use thiserror::Error;

use super::transport::TransportError;

/// Structured error types for broker operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("rate limited by broker (retry after {:.1}s)", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("HTTP {status} on {path}: {body}")]
    Http {
        status: u16,
        path: String,
        body: String,
    },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("no market data for '{symbol}': seed position never appeared")]
    MarketDataUnavailable { symbol: String },

    #[error("order quantity must be positive, got {0}")]
    InvalidQuantity(f64),
}

impl BrokerError {
    /// Signalled back-off, if this error is a rate limit.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BrokerError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<TransportError> for BrokerError {
    fn from(e: TransportError) -> Self {
        BrokerError::Transport(e.to_string())
    }
}
