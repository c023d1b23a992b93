use ulid::Ulid;

use crate::model::HoldStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("exclusion violation on room {room_id}: overlaps active hold {existing}")]
    ExclusionViolation { room_id: Ulid, existing: Ulid },
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("invalid transition for hold {id}: {from} -> {to}")]
    InvalidTransition {
        id: Ulid,
        from: HoldStatus,
        to: HoldStatus,
    },
    #[error("room {0} is not locked by this transaction")]
    NotLocked(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
