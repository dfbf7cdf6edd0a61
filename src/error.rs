//! Concrete error taxonomy shared by the trainer, thinker, and trader.
//!
//! Business logic returns `anyhow::Result` almost everywhere; this enum
//! exists for the handful of call sites that need to branch on error kind
//! rather than just log and move on (retry policies, the health monitor,
//! the fatal-vs-recoverable split at startup).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("settings file unreadable or out of range: {0}")]
    ConfigInvalid(String),

    #[error("market data request failed: {0}")]
    MarketDataFailure(String),

    #[error("venue credentials missing or invalid")]
    VenueAuthFailure,

    #[error("order rejected by venue: {0}")]
    VenueOrderFailure(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unparseable record, skipped: {0}")]
    DataCorruption(String),

    #[error("training interrupted by killer.txt")]
    TrainingInterrupt,
}

impl PipelineError {
    /// Whether this error should ever count toward the health monitor's
    /// rolling error-rate window. Interrupts are a clean shutdown request,
    /// not a fault.
    pub fn counts_as_health_error(&self) -> bool {
        !matches!(self, PipelineError::TrainingInterrupt)
    }
}
