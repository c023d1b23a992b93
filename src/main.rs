use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use roomhold::catalog::InMemoryCatalog;
use roomhold::clock::SystemClock;
use roomhold::config::ServerConfig;
use roomhold::engine::Engine;
use roomhold::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use roomhold::service::HoldService;
use roomhold::{sweeper, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    roomhold::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path())?);
    let catalog = match &config.rooms_file {
        Some(path) => InMemoryCatalog::from_json_file(path)?,
        None => InMemoryCatalog::new(),
    };
    let room_count = catalog.room_count();
    let service = Arc::new(HoldService::new(
        engine.clone(),
        Arc::new(catalog),
        Arc::new(SystemClock),
        config.hold,
    ));

    tokio::spawn(sweeper::run_sweeper(service.clone()));
    tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("roomhold listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {room_count}, holds: {}", engine.hold_count());
    info!("  hold_ttl_minutes: {}", config.hold.hold_ttl_minutes);
    info!("  expire_sweep_interval_ms: {}", config.hold.expire_sweep_interval_ms);
    info!("  max_connections: {max_connections}");

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    let shutdown = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable ({e}), ctrl-c only");
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let service = service.clone();
                let pw = config.password.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, service, pw).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("roomhold stopped");
    Ok(())
}
