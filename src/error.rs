use crate::restore::ledger::DeliveryState;
use thiserror::Error;

/// Typed failures from the delivery ledger. Callers that race on the same
/// record (dispatcher vs. reconciler) downcast these to tell a benign
/// lost-race apart from real I/O trouble.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no delivery record for fingerprint {0}")]
    NotFound(String),
    #[error("delivery record {fingerprint} is {found}, expected {expected}")]
    StateMismatch {
        fingerprint: String,
        expected: DeliveryState,
        found: DeliveryState,
    },
    #[error("fingerprint {0} already verified; refusing to overwrite")]
    Conflict(String),
}

/// A failed remote call. `Status` carries the remote error code verbatim;
/// the circuit breaker owns the mapping from code to severity.
#[derive(Debug, Clone, Error)]
pub enum ApiFailure {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote status {code}: {message}")]
    Status { code: i64, message: String },
}

impl ApiFailure {
    pub fn status(code: i64, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Transport(_) => None,
            Self::Status { code, .. } => Some(*code),
        }
    }
}
