//! Prediction signal sources.
//!
//! A `SignalSource` fetches exactly one directional prediction per cycle.
//! Failures are split into transient (the cycle degrades to a stale hold)
//! and rejected (the cycle halts).

pub mod allora;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::types::Signal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// Transport failure, timeout, rate limit or 5xx. Safe to retry next cycle.
    #[error("signal fetch failed transiently: {0}")]
    Transient(String),

    /// The provider refused the request or returned an unusable payload.
    #[error("signal request rejected: {0}")]
    Rejected(String),
}

impl SignalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SignalError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SignalError::Transient(message)
        } else {
            SignalError::Rejected(message)
        }
    }
}

/// Source of per-cycle price predictions.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Fetch the current prediction for `topic_id`.
    async fn fetch(&self, topic_id: u64) -> Result<Signal, SignalError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}
