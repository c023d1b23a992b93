use std::sync::Arc;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Flip every `HOLD_CREATED` hold with `expires_at <= now` to `EXPIRED`
    /// in one transaction. Returns the number of holds changed.
    ///
    /// Ledgers are locked in room-id order and only for rooms that have
    /// something to expire.
    pub async fn expire_holds(self: &Arc<Self>, now: Ms) -> Result<usize, EngineError> {
        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort();

        let mut txn = self.begin();
        let mut expired = 0;
        for room_id in room_ids {
            expired += txn.expire_overdue_in(room_id, now).await;
        }
        txn.commit().await?;
        Ok(expired)
    }

    /// Rewrite the WAL as a minimal snapshot. Returns the event count written.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
