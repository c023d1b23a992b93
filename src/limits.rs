use crate::model::Ms;

/// Idempotency keys longer than this are rejected before any lock is taken.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

pub const MAX_GUEST_NAME_LEN: usize = 200;
pub const MAX_GUEST_PHONE_LEN: usize = 50;

/// Active holds per room ledger. Terminal holds stay in the ledger but do not count.
pub const MAX_HOLDS_PER_ROOM: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One year.
pub const MAX_STAY_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_SQL_LEN: usize = 16 * 1024;
