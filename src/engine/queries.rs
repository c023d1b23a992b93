use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn room_for_hold(&self, hold_id: &Ulid) -> Option<Ulid> {
        self.hold_index.get(hold_id).map(|e| *e.value())
    }

    /// Committed view of a hold. Waits behind any transaction holding its row.
    pub async fn get_hold(&self, id: Ulid) -> Result<Hold, EngineError> {
        let room_id = self.room_for_hold(&id).ok_or(EngineError::NotFound(id))?;
        let slot = self.slot(room_id);
        let hold = slot.ledger.read().await.hold(&id).cloned();
        hold.ok_or(EngineError::NotFound(id))
    }

    /// All holds on a room in stay order, any status.
    pub async fn holds_for_room(&self, room_id: Ulid) -> Vec<Hold> {
        let Some(slot) = self.rooms.get(&room_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let holds = slot.ledger.read().await.holds.clone();
        holds
    }

    pub fn idempotency_record(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        self.idempotency.get(key).map(|e| e.value().clone())
    }

    pub fn hold_count(&self) -> usize {
        self.hold_index.len()
    }

    /// Number of advisory key locks currently held or awaited.
    pub fn key_locks_in_use(&self) -> usize {
        self.key_locks.len()
    }
}
