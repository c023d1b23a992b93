use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomhold_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomhold_query_duration_seconds";

// ── Hold lifecycle ──────────────────────────────────────────────

/// Counter: create-hold calls. Labels: outcome (`ok` or an error code).
pub const HOLDS_CREATED_TOTAL: &str = "roomhold_holds_created_total";

/// Histogram: create-hold latency in seconds, lock waits included.
pub const CREATE_HOLD_DURATION_SECONDS: &str = "roomhold_create_hold_duration_seconds";

/// Counter: create-hold calls answered from the idempotency store.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "roomhold_idempotent_replays_total";

/// Counter: confirm/cancel calls. Labels: action, outcome.
pub const HOLD_TRANSITIONS_TOTAL: &str = "roomhold_hold_transitions_total";

/// Counter: holds flipped to EXPIRED. Labels: source (sweep, inline, lazy, allocator).
pub const HOLDS_EXPIRED_TOTAL: &str = "roomhold_holds_expired_total";

/// Counter: candidate rooms skipped because another allocation held the row lock.
pub const ROOMS_SKIPPED_LOCKED_TOTAL: &str = "roomhold_rooms_skipped_locked_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomhold_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomhold_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomhold_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomhold_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (frames per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomhold_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateHold { .. } => "create_hold",
        Command::ConfirmHold { .. } => "confirm_hold",
        Command::CancelHold { .. } => "cancel_hold",
        Command::ExpireHolds { .. } => "expire_holds",
        Command::SelectHold { .. } => "select_hold",
        Command::SelectRooms { .. } => "select_rooms",
    }
}
