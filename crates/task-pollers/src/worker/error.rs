use crate::history::HistoryError;
use crate::reliability::{classify, ErrorClass};
use crate::service::ServiceError;

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// A service call failed (after retrying, where it is retried)
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// History could not be read
    #[error("history error: {0}")]
    History(#[from] HistoryError),

    /// The task handler failed
    #[error("task handler failed: {0:#}")]
    Handler(anyhow::Error),

    /// A handler broke the poller's contract
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Worker shutdown
    #[error("worker is shutting down")]
    Shutdown,
}

impl PollerError {
    /// Whether repeating the same poll or response could succeed
    ///
    /// Handler failures, invariant violations and shutdown are never
    /// transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Service(e) | Self::History(HistoryError::Service(e)) => {
                classify(e) != ErrorClass::Permanent
            }
            _ => false,
        }
    }

    /// Whether this signals a protocol or data-consistency break
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Self::InvariantViolation(_) => true,
            Self::History(e) => e.is_integrity_violation(),
            _ => false,
        }
    }
}
