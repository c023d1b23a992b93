mod create;
mod transition;

pub use transition::{Transition, TransitionPlan, plan_transition};

use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::catalog::RoomCatalog;
use crate::clock::Clock;
use crate::config::HoldConfig;
use crate::engine::Engine;
use crate::error::HoldError;
use crate::limits::*;
use crate::model::*;

/// Hold lifecycle: idempotent creation, confirm/cancel with lazy expiry,
/// and the expiry sweep. Time and configuration are injected.
pub struct HoldService {
    engine: Arc<Engine>,
    catalog: Arc<dyn RoomCatalog>,
    clock: Arc<dyn Clock>,
    config: HoldConfig,
}

impl HoldService {
    pub fn new(
        engine: Arc<Engine>,
        catalog: Arc<dyn RoomCatalog>,
        clock: Arc<dyn Clock>,
        config: HoldConfig,
    ) -> Self {
        Self {
            engine,
            catalog,
            clock,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn config(&self) -> HoldConfig {
        self.config
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Expire every overdue `HOLD_CREATED` hold. Safe to repeat.
    pub async fn expire_holds(&self, now: Ms) -> Result<usize, HoldError> {
        let expired = self.engine.expire_holds(now).await?;
        if expired > 0 {
            metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL, "source" => "sweep")
                .increment(expired as u64);
            info!(expired, "expired overdue holds");
        }
        Ok(expired)
    }

    pub async fn get_hold(&self, hold_id: &str) -> Result<Hold, HoldError> {
        let id = parse_ulid("holdId", hold_id)?;
        Ok(self.engine.get_hold(id).await?)
    }

    pub async fn list_rooms(&self, hotel_id: &str) -> Result<Vec<Room>, HoldError> {
        let id = parse_ulid("hotelId", hotel_id)?;
        Ok(self.catalog.list_rooms(id).await?)
    }
}

pub(crate) fn parse_ulid(field: &str, raw: &str) -> Result<Ulid, HoldError> {
    Ulid::from_string(raw.trim())
        .map_err(|_| HoldError::InvalidRequest(format!("{field} must be a valid ULID")))
}

pub(crate) fn validate_idempotency_key(key: &str) -> Result<(), HoldError> {
    if key.trim().is_empty() {
        return Err(HoldError::InvalidRequest(
            "Idempotency-Key must not be blank".into(),
        ));
    }
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(HoldError::InvalidRequest(format!(
            "Idempotency-Key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(())
}

fn non_blank(field: &str, value: &str, max_len: usize) -> Result<(), HoldError> {
    if value.trim().is_empty() {
        return Err(HoldError::InvalidRequest(format!("{field} must not be blank")));
    }
    if value.chars().count() > max_len {
        return Err(HoldError::InvalidRequest(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(())
}

/// Shape checks for a create request. Returns the parsed hotel id and stay.
pub(crate) fn validate_create(request: &CreateHoldRequest) -> Result<(Ulid, Span), HoldError> {
    let hotel_id = parse_ulid("hotelId", &request.hotel_id)?;
    non_blank("guestName", &request.guest_name, MAX_GUEST_NAME_LEN)?;
    non_blank("guestPhone", &request.guest_phone, MAX_GUEST_PHONE_LEN)?;
    if request.check_out <= request.check_in {
        return Err(HoldError::InvalidRequest(
            "checkOut must be after checkIn".into(),
        ));
    }
    if request.check_in < MIN_VALID_TIMESTAMP_MS || request.check_out > MAX_VALID_TIMESTAMP_MS {
        return Err(HoldError::InvalidRequest(
            "checkIn/checkOut out of range".into(),
        ));
    }
    if request.check_out - request.check_in > MAX_STAY_DURATION_MS {
        return Err(HoldError::InvalidRequest("stay is too long".into()));
    }
    Ok((hotel_id, Span::new(request.check_in, request.check_out)))
}
