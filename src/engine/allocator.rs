use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_HOLDS_PER_ROOM;
use crate::model::*;

use super::conflict::validate_stay;
use super::{EngineError, Txn};

/// A room as offered by the catalog to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRoom {
    pub room_id: Ulid,
    pub active: bool,
}

/// Everything about a new hold except the room it lands on.
#[derive(Debug, Clone)]
pub struct HoldDraft {
    pub hotel_id: Ulid,
    pub guest_name: String,
    pub guest_phone: String,
    pub stay: Span,
    pub expires_at: Ms,
}

impl Txn {
    /// Pick the first active candidate room (in id order) that is free for
    /// `draft.stay` at `now`, and place a `HOLD_CREATED` hold on it.
    ///
    /// A room whose row lock is held by another in-flight transaction is
    /// skipped rather than waited on. The chosen room stays locked until this
    /// transaction ends. Returns `None` when no candidate qualifies.
    pub async fn allocate(
        &mut self,
        candidates: &[CandidateRoom],
        draft: HoldDraft,
        now: Ms,
    ) -> Result<Option<Hold>, EngineError> {
        validate_stay(&draft.stay)?;

        let mut room_ids: Vec<Ulid> = candidates
            .iter()
            .filter(|c| c.active)
            .map(|c| c.room_id)
            .collect();
        room_ids.sort();
        room_ids.dedup();

        for room_id in room_ids {
            let slot = self.engine.slot(room_id);
            let Ok(row_lock) = slot.row_lock.clone().try_lock_owned() else {
                metrics::counter!(crate::observability::ROOMS_SKIPPED_LOCKED_TOTAL).increment(1);
                debug!(%room_id, "room locked by another allocation, skipping");
                continue;
            };
            let (idx, fresh) = match self.ledger_index(room_id) {
                Some(idx) => (idx, false),
                None => {
                    self.ledgers.push(slot.ledger.clone().write_owned().await);
                    (self.ledgers.len() - 1, true)
                }
            };
            let ledger = &self.ledgers[idx];
            let unavailable = if ledger.active_count() >= MAX_HOLDS_PER_ROOM {
                Some("room ledger full".to_string())
            } else {
                ledger
                    .conflicting(&draft.stay, now)
                    .map(|blocker| format!("blocked by hold {}", blocker.id))
            };
            if let Some(reason) = unavailable {
                debug!(%room_id, %reason, "room unavailable");
                if fresh {
                    self.ledgers.pop();
                }
                continue;
            }

            // Overdue holds no longer block; expire them here so the commit-time
            // exclusion check agrees.
            let overdue: Vec<Ulid> = ledger
                .overlapping(&draft.stay)
                .filter(|h| h.is_overdue(now))
                .map(|h| h.id)
                .collect();
            let mut expired = 0u64;
            for id in overdue {
                if self.is_pending_status_change(&id) {
                    continue;
                }
                self.pending.push(Event::HoldStatusChanged {
                    id,
                    room_id,
                    status: HoldStatus::Expired,
                    at: now,
                });
                expired += 1;
            }
            if expired > 0 {
                metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL, "source" => "allocator")
                    .increment(expired);
            }

            let hold = Hold {
                id: Ulid::new(),
                hotel_id: draft.hotel_id,
                room_id,
                guest_name: draft.guest_name,
                guest_phone: draft.guest_phone,
                stay: draft.stay,
                status: HoldStatus::HoldCreated,
                created_at: now,
                expires_at: draft.expires_at,
                confirmed_at: None,
                cancelled_at: None,
                expired_at: None,
                updated_at: None,
            };
            self.pending.push(Event::HoldPlaced { hold: hold.clone() });
            self.row_locks.push(row_lock);
            return Ok(Some(hold));
        }

        Ok(None)
    }
}
