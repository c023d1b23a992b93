use std::collections::{BTreeMap, HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

/// Committed state folded from an event stream, without any locking.
/// Used for startup replay and for WAL compaction.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Ordered by id (ULIDs sort by creation time).
    pub holds: BTreeMap<Ulid, Hold>,
    pub idempotency: Vec<(IdempotencyKey, IdempotencyRecord)>,
}

impl Snapshot {
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut snapshot = Self::default();
        let mut seen_keys: HashSet<IdempotencyKey> = HashSet::new();
        for event in events {
            match event {
                Event::HoldPlaced { hold } => {
                    snapshot.holds.insert(hold.id, hold);
                }
                Event::HoldStatusChanged { id, status, at, .. } => {
                    if let Some(hold) = snapshot.holds.get_mut(&id) {
                        hold.apply_status(status, at);
                    }
                }
                Event::IdempotencyRecorded { key, record } => {
                    // First write wins; the commit path never lets a second one through.
                    if seen_keys.insert(key.clone()) {
                        snapshot.idempotency.push((key, record));
                    }
                }
            }
        }
        snapshot
    }

    /// Group holds into per-room ledgers.
    pub fn ledgers(&self) -> HashMap<Ulid, RoomLedger> {
        let mut ledgers: HashMap<Ulid, RoomLedger> = HashMap::new();
        for hold in self.holds.values() {
            ledgers
                .entry(hold.room_id)
                .or_insert_with(|| RoomLedger::new(hold.room_id))
                .insert_hold(hold.clone());
        }
        ledgers
    }

    /// Minimal event list that recreates this snapshot.
    pub fn into_events(self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .holds
            .into_values()
            .map(|hold| Event::HoldPlaced { hold })
            .collect();
        events.extend(
            self.idempotency
                .into_iter()
                .map(|(key, record)| Event::IdempotencyRecorded { key, record }),
        );
        events
    }
}
