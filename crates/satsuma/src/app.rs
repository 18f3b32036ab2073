use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use satsuma_catalog::CatalogFetcher;
use satsuma_diskstate::{DiskState, JsonFormat, StateLock};
use satsuma_engine::{DownloadEngine, TransferUpdate};
use satsuma_queue::QueueCoordinator;
use satsuma_server::AppState;

#[derive(Debug, Clone)]
pub struct Options {
    pub state_dir: PathBuf,
    pub listen: SocketAddr,
    pub concurrency: usize,
}

pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wires the daemon together and serves until a shutdown signal arrives:
/// state lock, disk recovery, the queue coordinator, and the observer API.
/// The catalog and engine capabilities are injected so tests can run the
/// whole stack against scripted fakes.
pub async fn run(
    options: Options,
    catalog: Arc<dyn CatalogFetcher>,
    engine: Arc<dyn DownloadEngine>,
    event_rx: mpsc::Receiver<TransferUpdate>,
) -> Result<()> {
    let _lock = StateLock::acquire(&options.state_dir)?;
    let disk = DiskState::new(options.state_dir.clone(), JsonFormat)
        .context("opening state directory")?;

    let report = disk.recover().context("recovering state directory")?;
    if report.tmp_files_cleaned > 0 {
        tracing::warn!(
            cleaned = report.tmp_files_cleaned,
            "removed interrupted state writes"
        );
    }

    let restored = match disk.load_state() {
        Ok(state) => state,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "discarding unreadable queue state");
            None
        }
    };

    let (coordinator, handle, snapshot_rx) =
        QueueCoordinator::new(options.concurrency, engine, catalog, disk, event_rx);
    let mut coordinator = match restored {
        Some(state) => {
            tracing::info!("restoring persisted queue");
            coordinator.with_state(state)
        }
        None => coordinator,
    };
    let queue_task = tokio::spawn(async move { coordinator.run().await });

    let state = AppState::new(handle.clone(), snapshot_rx);
    let listener = tokio::net::TcpListener::bind(options.listen)
        .await
        .with_context(|| format!("binding {}", options.listen))?;
    tracing::info!(addr = %listener.local_addr()?, "observer API listening");

    axum::serve(listener, satsuma_server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving observer API")?;

    let _ = handle.shutdown().await;
    let _ = queue_task.await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}
