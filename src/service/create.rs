use std::time::Instant;

use tracing::{debug, info, warn};

use crate::engine::{EngineError, HoldDraft};
use crate::error::HoldError;
use crate::idempotency::{create_hold_key, request_hash};
use crate::model::*;
use crate::observability::{HOLDS_CREATED_TOTAL, HOLDS_EXPIRED_TOTAL, IDEMPOTENT_REPLAYS_TOTAL};

use super::{HoldService, validate_create, validate_idempotency_key};

impl HoldService {
    /// Create a hold, or return the response recorded for an earlier call
    /// with the same key and request.
    pub async fn create_hold(
        &self,
        idempotency_key: &str,
        request: &CreateHoldRequest,
    ) -> Result<HoldResponse, HoldError> {
        let raw = self.create_hold_json(idempotency_key, request).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// As `create_hold`, returning the serialized response exactly as stored.
    pub async fn create_hold_json(
        &self,
        idempotency_key: &str,
        request: &CreateHoldRequest,
    ) -> Result<String, HoldError> {
        let start = Instant::now();
        let result = self.create_hold_inner(idempotency_key, request).await;
        metrics::histogram!(crate::observability::CREATE_HOLD_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!(HOLDS_CREATED_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn create_hold_inner(
        &self,
        idempotency_key: &str,
        request: &CreateHoldRequest,
    ) -> Result<String, HoldError> {
        validate_idempotency_key(idempotency_key)?;
        let key = create_hold_key(idempotency_key);
        let hash = request_hash(request);

        // Lock, check, validate, sweep, allocate, record.
        let mut txn = self.engine.begin();
        txn.lock_key(&key).await;

        if let Some(record) = txn.idempotency_record(&key) {
            return replay_or_conflict(idempotency_key, record, &hash);
        }

        let (hotel_id, stay) = validate_create(request)?;

        let now = self.clock.now();
        // Commits on its own, outside `txn`. Expiring overdue holds is
        // idempotent and this transaction's allocator re-checks expiry under
        // its own locks, so the split does not change the outcome.
        let swept = self.engine.expire_holds(now).await?;
        if swept > 0 {
            metrics::counter!(HOLDS_EXPIRED_TOTAL, "source" => "inline").increment(swept as u64);
            debug!(swept, "inline sweep expired holds");
        }

        let candidates = self.catalog.list_candidate_rooms(hotel_id).await?;
        let draft = HoldDraft {
            hotel_id,
            guest_name: request.guest_name.clone(),
            guest_phone: request.guest_phone.clone(),
            stay,
            expires_at: now.saturating_add(self.config.ttl_ms()),
        };
        let Some(hold) = txn.allocate(&candidates, draft, now).await? else {
            info!(%hotel_id, candidates = candidates.len(), "no availability");
            return Err(HoldError::NoAvailability);
        };

        let response = serde_json::to_string(&HoldResponse::from_hold(&hold))?;
        txn.record_idempotency(
            key.clone(),
            IdempotencyRecord {
                request_hash: hash.clone(),
                response: response.clone(),
            },
        );

        match txn.commit().await {
            Ok(()) => {
                info!(
                    hold_id = %hold.id,
                    room_id = %hold.room_id,
                    %hotel_id,
                    expires_at = hold.expires_at,
                    "hold created"
                );
                Ok(response)
            }
            // Only a writer that recorded the key without taking its lock
            // can get here; the stored record decides the answer.
            Err(EngineError::UniqueViolation(_)) => {
                warn!(key = idempotency_key, "idempotency record raced, re-reading");
                resolve_unique_race(idempotency_key, self.engine.idempotency_record(&key), &hash)
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub(super) fn resolve_unique_race(
    idempotency_key: &str,
    stored: Option<IdempotencyRecord>,
    hash: &str,
) -> Result<String, HoldError> {
    match stored {
        Some(record) => replay_or_conflict(idempotency_key, record, hash),
        None => Err(HoldError::IdempotencyKeyConflict),
    }
}

fn replay_or_conflict(
    idempotency_key: &str,
    record: IdempotencyRecord,
    hash: &str,
) -> Result<String, HoldError> {
    if record.request_hash == hash {
        metrics::counter!(IDEMPOTENT_REPLAYS_TOTAL).increment(1);
        debug!(key = idempotency_key, "idempotent replay");
        Ok(record.response)
    } else {
        info!(key = idempotency_key, "idempotency key reused with a different request");
        Err(HoldError::IdempotencyKeyConflict)
    }
}
