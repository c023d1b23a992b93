use std::sync::Arc;

use tokio::sync::{OwnedMutexGuard, OwnedRwLockWriteGuard};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::conflict::check_constraints;
use super::{Engine, EngineError, KeyLockGuard};

/// A unit of work over the hold store.
///
/// Locks acquired through a `Txn` are held until it commits or is dropped.
/// Mutations are buffered as events; `commit` validates them against the
/// storage constraints, writes them to the WAL as one frame and only then
/// applies them. Dropping an uncommitted `Txn` is a rollback.
pub struct Txn {
    pub(super) engine: Arc<Engine>,
    pub(super) key_locks: Vec<KeyLockGuard>,
    pub(super) row_locks: Vec<OwnedMutexGuard<()>>,
    pub(super) ledgers: Vec<OwnedRwLockWriteGuard<RoomLedger>>,
    pub(super) pending: Vec<Event>,
}

impl Txn {
    pub(super) fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            key_locks: Vec::new(),
            row_locks: Vec::new(),
            ledgers: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Transaction-scoped advisory lock on an idempotency key.
    pub async fn lock_key(&mut self, key: &IdempotencyKey) {
        let name = key.lock_name();
        if self.key_locks.iter().any(|g| g.name() == name) {
            return;
        }
        let guard = self.engine.key_locks.acquire(name).await;
        self.key_locks.push(guard);
    }

    /// Committed idempotency record for `key`, if any.
    pub fn idempotency_record(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        self.engine.idempotency.get(key).map(|r| r.value().clone())
    }

    pub fn record_idempotency(&mut self, key: IdempotencyKey, record: IdempotencyRecord) {
        self.pending.push(Event::IdempotencyRecorded { key, record });
    }

    pub(super) fn ledger_index(&self, room_id: Ulid) -> Option<usize> {
        self.ledgers.iter().position(|l| l.room_id == room_id)
    }

    /// Write-lock the room ledger if this transaction does not already hold it.
    pub(super) async fn lock_ledger(&mut self, room_id: Ulid) -> usize {
        if let Some(idx) = self.ledger_index(room_id) {
            return idx;
        }
        let slot = self.engine.slot(room_id);
        let guard = slot.ledger.write_owned().await;
        self.ledgers.push(guard);
        self.ledgers.len() - 1
    }

    /// Lock the hold's row (its room ledger) and return the committed hold.
    pub async fn lock_hold(&mut self, id: Ulid) -> Result<Hold, EngineError> {
        let room_id = self
            .engine
            .hold_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let idx = self.lock_ledger(room_id).await;
        self.ledgers[idx]
            .hold(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Buffer a status change for a hold locked by this transaction.
    /// Returns the hold as it will look once committed.
    pub fn set_status(&mut self, hold: &Hold, status: HoldStatus, at: Ms) -> Hold {
        self.pending.push(Event::HoldStatusChanged {
            id: hold.id,
            room_id: hold.room_id,
            status,
            at,
        });
        let mut updated = hold.clone();
        updated.apply_status(status, at);
        updated
    }

    /// Mark every overdue `HOLD_CREATED` hold on the room as expired.
    /// Returns how many were marked.
    pub async fn expire_overdue_in(&mut self, room_id: Ulid, now: Ms) -> usize {
        if self.ledger_index(room_id).is_none() {
            let slot = self.engine.slot(room_id);
            if !slot.ledger.read().await.has_overdue(now) {
                return 0;
            }
        }
        let idx = self.lock_ledger(room_id).await;
        let overdue: Vec<Ulid> = self.ledgers[idx]
            .holds
            .iter()
            .filter(|h| h.is_overdue(now))
            .map(|h| h.id)
            .collect();
        let mut marked = 0;
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
            marked += 1;
        }
        marked
    }

    pub(super) fn is_pending_status_change(&self, id: &Ulid) -> bool {
        self.pending
            .iter()
            .any(|e| matches!(e, Event::HoldStatusChanged { id: pid, .. } if pid == id))
    }

    pub fn pending_events(&self) -> &[Event] {
        &self.pending
    }

    /// Validate, persist and apply. Runs on its own task so that a caller
    /// abandoning the future cannot interrupt a commit half way.
    pub async fn commit(self) -> Result<(), EngineError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        tokio::spawn(self.finish())
            .await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    async fn finish(mut self) -> Result<(), EngineError> {
        // Idempotency uniqueness is only enforceable under the key's lock.
        let unlocked: Vec<String> = self
            .pending
            .iter()
            .filter_map(|e| match e {
                Event::IdempotencyRecorded { key, .. } => Some(key.lock_name()),
                _ => None,
            })
            .filter(|name| !self.key_locks.iter().any(|g| g.name() == name))
            .collect();
        for name in unlocked {
            let guard = self.engine.key_locks.acquire(name).await;
            self.key_locks.push(guard);
        }

        check_constraints(&self.pending, &self.ledgers, &self.engine.idempotency)?;

        let frame = std::mem::take(&mut self.pending);
        self.engine.wal_append(frame.clone()).await?;
        for event in &frame {
            self.apply(event);
        }
        Ok(())
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::HoldPlaced { hold } => {
                if let Some(idx) = self.ledger_index(hold.room_id) {
                    self.ledgers[idx].insert_hold(hold.clone());
                }
                self.engine.hold_index.insert(hold.id, hold.room_id);
            }
            Event::HoldStatusChanged {
                id,
                room_id,
                status,
                at,
            } => {
                if let Some(idx) = self.ledger_index(*room_id)
                    && let Some(hold) = self.ledgers[idx].hold_mut(id)
                {
                    hold.apply_status(*status, *at);
                }
            }
            Event::IdempotencyRecorded { key, record } => {
                self.engine.idempotency.insert(key.clone(), record.clone());
            }
        }
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(events = self.pending.len(), "transaction rolled back");
        }
    }
}
