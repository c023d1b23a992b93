use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::engine::EngineError;
use crate::model::HoldStatus;

/// How a caller should treat a failed hold operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ClientError,
    Conflict,
    NotFound,
    Unexpected,
}

/// Outcome of a failed hold operation.
#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("no room available for the requested stay")]
    NoAvailability,
    #[error("idempotency key was already used with a different request")]
    IdempotencyKeyConflict,
    #[error("hold not found: {0}")]
    HoldNotFound(Ulid),
    #[error("hold {0} has expired")]
    HoldExpired(Ulid),
    #[error("hold {id} is {status}")]
    HoldStatusConflict { id: Ulid, status: HoldStatus },
    #[error("storage failure: {0}")]
    Storage(#[source] EngineError),
    #[error("room catalog failure: {0}")]
    Catalog(#[from] CatalogError),
    #[error("response encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl HoldError {
    pub fn code(&self) -> &'static str {
        match self {
            HoldError::InvalidRequest(_) => "INVALID_REQUEST",
            HoldError::NoAvailability => "NO_AVAILABILITY",
            HoldError::IdempotencyKeyConflict => "IDEMPOTENCY_KEY_CONFLICT",
            HoldError::HoldNotFound(_) => "HOLD_NOT_FOUND",
            HoldError::HoldExpired(_) => "HOLD_EXPIRED",
            HoldError::HoldStatusConflict { .. } => "HOLD_STATUS_CONFLICT",
            HoldError::Storage(_) | HoldError::Catalog(_) | HoldError::Encoding(_) => "INTERNAL",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HoldError::InvalidRequest(_) => ErrorCategory::ClientError,
            HoldError::NoAvailability
            | HoldError::IdempotencyKeyConflict
            | HoldError::HoldExpired(_)
            | HoldError::HoldStatusConflict { .. } => ErrorCategory::Conflict,
            HoldError::HoldNotFound(_) => ErrorCategory::NotFound,
            HoldError::Storage(_) | HoldError::Catalog(_) | HoldError::Encoding(_) => {
                ErrorCategory::Unexpected
            }
        }
    }
}

impl From<EngineError> for HoldError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => HoldError::HoldNotFound(id),
            EngineError::ExclusionViolation { .. } => HoldError::NoAvailability,
            EngineError::LimitExceeded(msg) => HoldError::InvalidRequest(msg.to_string()),
            other => HoldError::Storage(other),
        }
    }
}
