use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_stay(stay: &Span) -> Result<(), EngineError> {
    if stay.start >= stay.end {
        return Err(EngineError::LimitExceeded("stay must end after it starts"));
    }
    if stay.start < MIN_VALID_TIMESTAMP_MS || stay.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if stay.duration_ms() > MAX_STAY_DURATION_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Storage constraints a transaction's events must satisfy before they are
/// written: legal status transitions, no overlapping active holds per room,
/// and at most one idempotency record per key.
pub(super) fn check_constraints(
    pending: &[Event],
    ledgers: &[OwnedRwLockWriteGuard<RoomLedger>],
    idempotency: &DashMap<IdempotencyKey, IdempotencyRecord>,
) -> Result<(), EngineError> {
    let ledger_for = |room_id: Ulid| {
        ledgers
            .iter()
            .find(|l| l.room_id == room_id)
            .ok_or(EngineError::NotLocked(room_id))
    };
    let placed: Vec<&Hold> = pending
        .iter()
        .filter_map(|e| match e {
            Event::HoldPlaced { hold } => Some(hold),
            _ => None,
        })
        .collect();

    // Status transitions, in event order. `statuses` ends up holding the
    // status each touched hold will have after commit.
    let mut statuses: HashMap<Ulid, HoldStatus> = HashMap::new();
    let mut keys: HashSet<&IdempotencyKey> = HashSet::new();
    for event in pending {
        match event {
            Event::HoldStatusChanged {
                id,
                room_id,
                status,
                ..
            } => {
                let ledger = ledger_for(*room_id)?;
                let current = match statuses.get(id) {
                    Some(s) => *s,
                    None => ledger
                        .hold(id)
                        .or_else(|| placed.iter().copied().find(|h| h.id == *id))
                        .map(|h| h.status)
                        .ok_or(EngineError::NotFound(*id))?,
                };
                if !current.can_transition_to(*status) {
                    return Err(EngineError::InvalidTransition {
                        id: *id,
                        from: current,
                        to: *status,
                    });
                }
                statuses.insert(*id, *status);
            }
            Event::IdempotencyRecorded { key, .. } => {
                if !keys.insert(key) || idempotency.contains_key(key) {
                    return Err(EngineError::UniqueViolation(key.lock_name()));
                }
            }
            Event::HoldPlaced { .. } => {}
        }
    }

    let effective = |hold: &Hold| statuses.get(&hold.id).copied().unwrap_or(hold.status);

    // Exclusion: active holds on a room never overlap. Mirrors a storage
    // constraint, so `expires_at` is not consulted.
    for (i, &hold) in placed.iter().enumerate() {
        let ledger = ledger_for(hold.room_id)?;
        if !effective(hold).is_active() {
            continue;
        }
        if ledger.active_count() >= MAX_HOLDS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many active holds on room"));
        }
        let clash = ledger
            .overlapping(&hold.stay)
            .chain(placed[..i].iter().copied().filter(|other| {
                other.room_id == hold.room_id && other.stay.overlaps(&hold.stay)
            }))
            .find(|&other| other.id != hold.id && effective(other).is_active());
        if let Some(existing) = clash {
            return Err(EngineError::ExclusionViolation {
                room_id: hold.room_id,
                existing: existing.id,
            });
        }
    }

    Ok(())
}
