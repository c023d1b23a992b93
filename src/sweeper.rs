use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::service::HoldService;

/// Background task that expires overdue holds on the configured interval.
/// A failed sweep is logged and retried on the next tick.
pub async fn run_sweeper(service: Arc<HoldService>) {
    let mut interval = tokio::time::interval(service.config().sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let now = service.now();
        match service.expire_holds(now).await {
            Ok(0) => debug!("sweep found nothing to expire"),
            Ok(_) => {}
            Err(e) => warn!("expiry sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` appends happened since the last
/// compaction. Returns the number of events written, if it ran.
pub async fn compact_if_needed(
    engine: &Engine,
    threshold: u64,
) -> Result<Option<usize>, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await?;
    if appends < threshold {
        return Ok(None);
    }
    let events = engine.compact_wal().await?;
    info!(appends, events, "compacted WAL");
    Ok(Some(events))
}
