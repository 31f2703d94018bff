use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use reactoplan::advisory::CommandAdvisor;
use reactoplan::engine::{DEFAULT_LOCK_TIMEOUT, Engine};
use reactoplan::notify::NotifyHub;
use reactoplan::observability;
use reactoplan::wire::{self, ReactoplanFactory};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("REACTOPLAN_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    observability::init(metrics_port);

    let port: u16 = env_or("REACTOPLAN_PORT", 5433);
    let bind = std::env::var("REACTOPLAN_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("REACTOPLAN_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let max_connections: usize = env_or("REACTOPLAN_MAX_CONNECTIONS", 256);
    let compact_threshold: u64 = env_or("REACTOPLAN_COMPACT_THRESHOLD", 1000);
    let lock_timeout = Duration::from_millis(env_or(
        "REACTOPLAN_LOCK_TIMEOUT_MS",
        DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
    ));

    let tls_cert = std::env::var("REACTOPLAN_TLS_CERT").ok();
    let tls_key = std::env::var("REACTOPLAN_TLS_KEY").ok();
    let tls_acceptor =
        reactoplan::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;

    let wal_path = PathBuf::from(&data_dir).join("reactoplan.wal");
    let mut engine =
        Engine::new(wal_path, Arc::new(NotifyHub::new()))?.with_lock_timeout(lock_timeout);
    let advisor = std::env::var("REACTOPLAN_ADVISOR_CMD")
        .ok()
        .and_then(|cmd| CommandAdvisor::from_command_line(&cmd));
    let advisor_enabled = advisor.is_some();
    if let Some(advisor) = advisor {
        engine = engine.with_advisor(Arc::new(advisor));
    }
    let engine = Arc::new(engine);

    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        reactoplan::compactor::run_compactor(compactor_engine, compact_threshold).await;
    });

    let factory = Arc::new(ReactoplanFactory::new(engine.clone()));
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("reactoplan listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  reactors: {}", engine.state.len());
    info!("  max_connections: {max_connections}");
    info!("  lock_timeout: {lock_timeout:?}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!("  advisor: {}", if advisor_enabled { "enabled" } else { "disabled" });

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
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
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let factory = factory.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, factory, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
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
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("reactoplan stopped");
    Ok(())
}
