mod allocator;
mod conflict;
mod error;
mod locks;
mod mutations;
mod queries;
mod store;
mod txn;

pub use allocator::{CandidateRoom, HoldDraft};
pub use error::EngineError;
pub use locks::{KeyLockGuard, KeyLocks};
pub use store::Snapshot;
pub use txn::Txn;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<RoomLedger>>;

/// Per-room locks. `row_lock` is what allocators try-lock and skip when taken;
/// `ledger` guards the room's holds and is the lock transitions wait on.
#[derive(Clone)]
pub(crate) struct RoomSlot {
    pub(crate) row_lock: Arc<Mutex<()>>,
    pub(crate) ledger: SharedLedger,
}

impl RoomSlot {
    fn new(ledger: RoomLedger) -> Self {
        Self {
            row_lock: Arc::new(Mutex::new(())),
            ledger: Arc::new(RwLock::new(ledger)),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        frame: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingFrame = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches frames for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { frame, response } => {
                let mut batch: Vec<PendingFrame> = vec![(frame, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { frame, response }) => batch.push((frame, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingFrame>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingFrame]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(frame, _)| wal.append_buffered(frame))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        // Every sender hears Err, so none of the batch may stay on disk.
        match wal.discard_unsynced() {
            Ok(()) => warn!(error = %e, frames = batch.len(), "WAL batch failed, rolled back"),
            Err(discard) => error!(
                error = %e,
                %discard,
                "WAL batch failed and could not be rolled back; retrying before next append"
            ),
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let _ = response.send(compact(wal));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { frame, response } => {
            let mut batch = vec![(frame, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Rewrite the WAL from its own contents. Runs on the writer task, so no
/// append can interleave between the read and the swap.
fn compact(wal: &mut Wal) -> io::Result<usize> {
    if wal.is_poisoned() {
        wal.discard_unsynced()?;
    }
    let events = Wal::replay(wal.path())?;
    let before = events.len();
    let compacted = Snapshot::from_events(events).into_events();
    Wal::write_compact_file(wal.path(), &compacted)?;
    wal.swap_compact_file()?;
    info!(before, after = compacted.len(), "WAL compacted");
    Ok(compacted.len())
}

pub struct Engine {
    pub(crate) rooms: DashMap<Ulid, RoomSlot>,
    /// Reverse lookup: hold id → room id
    pub(crate) hold_index: DashMap<Ulid, Ulid>,
    pub(crate) idempotency: DashMap<IdempotencyKey, IdempotencyRecord>,
    pub(crate) key_locks: KeyLocks,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task. Must run inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let event_count = events.len();
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let snapshot = Snapshot::from_events(events);
        let engine = Self {
            rooms: DashMap::new(),
            hold_index: DashMap::new(),
            idempotency: DashMap::new(),
            key_locks: KeyLocks::new(),
            wal_tx,
        };
        for hold in snapshot.holds.values() {
            engine.hold_index.insert(hold.id, hold.room_id);
        }
        for (room_id, ledger) in snapshot.ledgers() {
            engine.rooms.insert(room_id, RoomSlot::new(ledger));
        }
        for (key, record) in snapshot.idempotency {
            engine.idempotency.insert(key, record);
        }

        info!(
            path = %wal_path.display(),
            events = event_count,
            holds = engine.hold_index.len(),
            idempotency_keys = engine.idempotency.len(),
            "engine replayed"
        );
        Ok(engine)
    }

    /// Start a transaction. Locks are taken by the transaction's methods and
    /// released when it commits or is dropped.
    pub fn begin(self: &Arc<Self>) -> Txn {
        Txn::new(self.clone())
    }

    /// The room's lock slot, created on first use.
    pub(crate) fn slot(&self, room_id: Ulid) -> RoomSlot {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| RoomSlot::new(RoomLedger::new(room_id)))
            .clone()
    }

    /// Write one transaction frame via the background group-commit writer.
    pub(super) async fn wal_append(&self, frame: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                frame,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
