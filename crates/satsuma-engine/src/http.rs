use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use satsuma_core::TransferId;

use crate::DownloadEngine;
use crate::error::EngineError;
use crate::model::{TransferProbe, TransferRequest, TransferState, TransferUpdate};

type TransferLedger = Arc<Mutex<HashMap<TransferId, TransferProbe>>>;

/// Streaming HTTP download engine. `issue` validates the request, mints an
/// identifier and returns immediately; the transfer itself runs in a
/// spawned task that reports `Downloading` and then a terminal state over
/// the event channel. Transfers stay in the ledger after finishing so
/// `lookup` can answer reconciliation probes.
pub struct HttpDownloadEngine {
    client: reqwest::Client,
    download_dir: PathBuf,
    events: mpsc::Sender<TransferUpdate>,
    next_id: AtomicU64,
    transfers: TransferLedger,
}

impl HttpDownloadEngine {
    pub fn new(download_dir: PathBuf, events: mpsc::Sender<TransferUpdate>) -> Self {
        Self {
            client: reqwest::Client::new(),
            download_dir,
            events,
            next_id: AtomicU64::new(1),
            transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait::async_trait]
impl DownloadEngine for HttpDownloadEngine {
    async fn issue(&self, request: TransferRequest) -> Result<TransferId, EngineError> {
        reqwest::Url::parse(&request.url)
            .map_err(|_| EngineError::InvalidUrl(request.url.clone()))?;
        if request.destination.is_empty()
            || Path::new(&request.destination).is_absolute()
            || request.destination.split('/').any(|s| s == "..")
        {
            return Err(EngineError::Rejected(format!(
                "unsafe destination: {}",
                request.destination
            )));
        }

        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        record_state(&self.transfers, id, &request.url, TransferState::Downloading);

        let client = self.client.clone();
        let target = self.download_dir.join(&request.destination);
        let events = self.events.clone();
        let ledger = self.transfers.clone();
        tokio::spawn(async move {
            let _ = events
                .send(TransferUpdate {
                    id,
                    state: TransferState::Downloading,
                })
                .await;
            let state = match run_transfer(&client, &request, &target).await {
                Ok(bytes) => {
                    tracing::debug!(transfer = %id, bytes, path = %target.display(), "transfer complete");
                    TransferState::Complete
                }
                Err(err) => {
                    tracing::debug!(transfer = %id, error = %format!("{err:#}"), "transfer interrupted");
                    TransferState::Interrupted
                }
            };
            record_state(&ledger, id, &request.url, state);
            let _ = events.send(TransferUpdate { id, state }).await;
        });

        Ok(id)
    }

    async fn lookup(&self, id: TransferId) -> Option<TransferProbe> {
        let transfers = self.transfers.lock().expect("transfer ledger lock");
        transfers.get(&id).cloned()
    }
}

fn record_state(ledger: &TransferLedger, id: TransferId, url: &str, state: TransferState) {
    let mut transfers = ledger.lock().expect("transfer ledger lock");
    transfers.insert(
        id,
        TransferProbe {
            url: url.to_string(),
            state,
        },
    );
}

async fn run_transfer(
    client: &reqwest::Client,
    request: &TransferRequest,
    target: &Path,
) -> anyhow::Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if !request.overwrite && tokio::fs::try_exists(target).await? {
        anyhow::bail!("destination already exists: {}", target.display());
    }

    let response = client.get(&request.url).send().await?.error_for_status()?;

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
