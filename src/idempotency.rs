use sha2::{Digest, Sha256};

use crate::model::{CreateHoldRequest, IdempotencyKey, format_ms};

/// Scope under which create-hold idempotency keys live.
pub const CREATE_HOLD_SCOPE: &str = "reservation-hold:create";

pub fn create_hold_key(key: &str) -> IdempotencyKey {
    IdempotencyKey::new(CREATE_HOLD_SCOPE, key)
}

/// Lowercase hex SHA-256 of the pipe-joined request fields, in declaration order.
pub fn request_hash(request: &CreateHoldRequest) -> String {
    let payload = [
        request.hotel_id.as_str(),
        request.guest_name.as_str(),
        request.guest_phone.as_str(),
        &format_ms(request.check_in),
        &format_ms(request.check_out),
    ]
    .join("|");
    hex::encode(Sha256::digest(payload.as_bytes()))
}
