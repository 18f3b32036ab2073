use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use satsuma_catalog::{CatalogError, CatalogFetcher, Selection, TrackNode, flatten_tree, valid_catalog_id};
use satsuma_core::{
    FileEntry, FileStatus, ItemStatus, QueueItem, TransferId, derive_item_status, sanitize_root,
};
use satsuma_diskstate::{DiskState, JsonFormat, PersistedState, STATE_VERSION};
use satsuma_engine::{DownloadEngine, TransferRequest, TransferState, TransferUpdate};

use crate::command::{QueueCommand, SelectedFile};
use crate::error::QueueError;
use crate::status::QueueSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    item_id: String,
    file_idx: usize,
}

#[derive(Debug, Clone)]
pub struct QueueHandle {
    command_tx: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    pub async fn add(
        &self,
        id: String,
        files: Option<Vec<SelectedFile>>,
    ) -> Result<QueueSnapshot, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::Add {
                id,
                files,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }

    pub async fn pause(&self, id: String) -> Result<QueueSnapshot, QueueError> {
        self.snapshot_request(|reply| QueueCommand::Pause { id, reply })
            .await
    }

    pub async fn resume(&self, id: String) -> Result<QueueSnapshot, QueueError> {
        self.snapshot_request(|reply| QueueCommand::Resume { id, reply })
            .await
    }

    pub async fn cancel(&self, id: String) -> Result<QueueSnapshot, QueueError> {
        self.snapshot_request(|reply| QueueCommand::Cancel { id, reply })
            .await
    }

    pub async fn retry(&self, id: String) -> Result<QueueSnapshot, QueueError> {
        self.snapshot_request(|reply| QueueCommand::Retry { id, reply })
            .await
    }

    pub async fn clear_completed(&self) -> Result<QueueSnapshot, QueueError> {
        self.snapshot_request(|reply| QueueCommand::ClearCompleted { reply })
            .await
    }

    pub async fn get_queue(&self) -> Result<QueueSnapshot, QueueError> {
        self.snapshot_request(|reply| QueueCommand::GetQueue { reply })
            .await
    }

    pub async fn get_tracks(&self, id: String) -> Result<Vec<TrackNode>, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::GetTracks { id, reply: reply_tx })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        let tree = reply_rx.await.map_err(|_| QueueError::Shutdown)?;
        Ok(tree?)
    }

    pub async fn update_settings(&self, root: String) -> Result<String, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(QueueCommand::UpdateSettings {
                root,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }

    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.command_tx
            .send(QueueCommand::Shutdown)
            .await
            .map_err(|_| QueueError::Shutdown)
    }

    async fn snapshot_request<F>(&self, build: F) -> Result<QueueSnapshot, QueueError>
    where
        F: FnOnce(oneshot::Sender<QueueSnapshot>) -> QueueCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| QueueError::Shutdown)?;
        reply_rx.await.map_err(|_| QueueError::Shutdown)
    }
}

/// Single-writer owner of all queue state. Every mutation applies in
/// memory, persists the full snapshot, then publishes it on the watch
/// channel, in that order; scheduling re-runs after every command and
/// every engine event.
pub struct QueueCoordinator {
    items: Vec<QueueItem>,
    root: String,
    active_transfers: usize,
    concurrency_limit: usize,
    transfer_index: HashMap<TransferId, FileKey>,
    engine: Arc<dyn DownloadEngine>,
    catalog: Arc<dyn CatalogFetcher>,
    disk: DiskState<JsonFormat>,
    command_tx: mpsc::Sender<QueueCommand>,
    command_rx: mpsc::Receiver<QueueCommand>,
    event_rx: mpsc::Receiver<TransferUpdate>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
    shutdown: bool,
}

impl QueueCoordinator {
    pub fn new(
        concurrency_limit: usize,
        engine: Arc<dyn DownloadEngine>,
        catalog: Arc<dyn CatalogFetcher>,
        disk: DiskState<JsonFormat>,
        event_rx: mpsc::Receiver<TransferUpdate>,
    ) -> (Self, QueueHandle, watch::Receiver<QueueSnapshot>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::default());
        let handle = QueueHandle {
            command_tx: command_tx.clone(),
        };
        let coordinator = Self {
            items: Vec::new(),
            root: String::new(),
            active_transfers: 0,
            concurrency_limit: concurrency_limit.max(1),
            transfer_index: HashMap::new(),
            engine,
            catalog,
            disk,
            command_tx,
            command_rx,
            event_rx,
            snapshot_tx,
            shutdown: false,
        };
        (coordinator, handle, snapshot_rx)
    }

    /// Installs a restored snapshot. Work interrupted by a restart goes
    /// back to `Pending`; transfer ids are kept and re-indexed so the
    /// engine's late reports still reconcile.
    pub fn with_state(mut self, state: PersistedState) -> Self {
        self.items = state.items;
        self.root = state.root;
        for item in &mut self.items {
            if item.status == ItemStatus::Downloading {
                item.status = ItemStatus::Pending;
            }
            for file in &mut item.files {
                if file.status == FileStatus::Downloading {
                    file.status = FileStatus::Pending;
                }
            }
        }
        self.rebuild_transfer_index();
        let _ = self.snapshot_tx.send(self.snapshot());
        self
    }

    /// Main coordinator loop. Commands take priority over engine events;
    /// the periodic refill tick recovers from missed wakeups so a free
    /// slot never idles waiting for the next external event.
    pub async fn run(&mut self) {
        for id in self.interrupted_fetches() {
            self.spawn_info_fetch(id);
        }
        self.fill_transfer_slots().await;

        let mut refill_tick = tokio::time::interval(std::time::Duration::from_millis(500));
        refill_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd);
                    self.fill_transfer_slots().await;
                }

                Some(update) = self.event_rx.recv() => {
                    self.handle_transfer_event(update).await;
                    self.fill_transfer_slots().await;
                }

                _ = refill_tick.tick() => {
                    self.fill_transfer_slots().await;
                }
            }

            if self.shutdown {
                break;
            }
        }
    }

    fn handle_command(&mut self, cmd: QueueCommand) {
        match cmd {
            QueueCommand::Add { id, files, reply } => {
                self.add_item(id, files);
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::Pause { id, reply } => {
                self.pause_item(&id);
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::Resume { id, reply } => {
                self.resume_item(&id);
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::Cancel { id, reply } => {
                self.cancel_item(&id);
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::Retry { id, reply } => {
                self.retry_item(&id);
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::ClearCompleted { reply } => {
                self.clear_completed();
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::GetQueue { reply } => {
                let _ = reply.send(self.snapshot());
            }
            QueueCommand::GetTracks { id, reply } => {
                let catalog = self.catalog.clone();
                tokio::spawn(async move {
                    let _ = reply.send(catalog.fetch_tree(&id).await);
                });
            }
            QueueCommand::UpdateSettings { root, reply } => {
                self.root = sanitize_root(&root);
                tracing::info!(root = %self.root, "updated download root");
                self.persist_and_broadcast();
                let _ = reply.send(self.root.clone());
            }
            QueueCommand::InfoFetched { id, result } => {
                self.info_fetched(&id, result);
            }
            QueueCommand::Shutdown => {
                tracing::info!("queue coordinator shutting down");
                self.shutdown = true;
            }
        }
    }

    fn add_item(&mut self, id: String, files: Option<Vec<SelectedFile>>) {
        if self.items.iter().any(|item| item.id == id) {
            tracing::warn!(item = %id, "item already queued, ignoring add");
            return;
        }
        if !valid_catalog_id(&id) {
            tracing::warn!(item = %id, "malformed catalog id, ignoring add");
            return;
        }
        match files {
            Some(selected) => {
                let files: Vec<FileEntry> = selected
                    .into_iter()
                    .map(|f| FileEntry::new(f.url, f.path))
                    .collect();
                let mut item = QueueItem::with_files(id, files);
                if item.files.is_empty() {
                    item.status = ItemStatus::Completed;
                }
                tracing::info!(item = %item.id, files = item.total_files, "queued item from explicit selection");
                self.items.push(item);
                self.persist_and_broadcast();
            }
            None => {
                tracing::info!(item = %id, "queued item, resolving catalog tree");
                self.items.push(QueueItem::fetching(id.clone()));
                self.persist_and_broadcast();
                self.spawn_info_fetch(id);
            }
        }
    }

    /// The catalog fetch runs off the coordinator so the loop stays
    /// responsive; the result comes back as an `InfoFetched` command and
    /// is applied against whatever the queue looks like by then.
    fn spawn_info_fetch(&self, id: String) {
        let catalog = self.catalog.clone();
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            let result = catalog
                .fetch_tree(&id)
                .await
                .map(|tree| flatten_tree(&tree, &id, &Selection::All));
            let _ = command_tx.send(QueueCommand::InfoFetched { id, result }).await;
        });
    }

    fn interrupted_fetches(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::FetchingInfo)
            .map(|item| item.id.clone())
            .collect()
    }

    fn info_fetched(&mut self, id: &str, result: Result<Vec<FileEntry>, CatalogError>) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            tracing::debug!(item = %id, "track info arrived for a removed item, dropping");
            return;
        };
        match result {
            Ok(files) if files.is_empty() => {
                tracing::info!(item = %id, "catalog tree has no downloadable files");
                item.files = files;
                item.total_files = 0;
                item.recompute_progress();
                item.status = ItemStatus::Completed;
            }
            Ok(files) => {
                item.total_files = files.len() as u32;
                item.files = files;
                item.completed_files = 0;
                item.recompute_progress();
                // a pause issued while the fetch was in flight sticks
                if item.status != ItemStatus::Paused {
                    item.status = ItemStatus::Pending;
                }
                tracing::info!(item = %id, files = item.total_files, "catalog tree resolved");
            }
            Err(err) => {
                tracing::warn!(item = %id, error = %err, "catalog fetch failed");
                item.status = ItemStatus::Error;
            }
        }
        self.persist_and_broadcast();
    }

    fn pause_item(&mut self, id: &str) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            tracing::debug!(item = %id, "pause for unknown item, ignoring");
            return;
        };
        if item.status == ItemStatus::Completed {
            return;
        }
        tracing::debug!(item = %id, "pausing item");
        item.status = ItemStatus::Paused;
        self.persist_and_broadcast();
    }

    fn resume_item(&mut self, id: &str) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            tracing::debug!(item = %id, "resume for unknown item, ignoring");
            return;
        };
        tracing::debug!(item = %id, "resuming item");
        item.status = ItemStatus::Pending;
        self.persist_and_broadcast();
    }

    /// Removal never cancels issued transfers; their identifiers are
    /// forgotten so later engine reports fall through to the orphan path
    /// and are dropped there.
    fn cancel_item(&mut self, id: &str) {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        if self.items.len() == before {
            tracing::debug!(item = %id, "cancel for unknown item, ignoring");
            return;
        }
        self.transfer_index.retain(|_, key| key.item_id != id);
        tracing::info!(item = %id, "removed item from queue");
        self.persist_and_broadcast();
    }

    fn retry_item(&mut self, id: &str) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            tracing::debug!(item = %id, "retry for unknown item, ignoring");
            return;
        };
        if item.files.is_empty() {
            // the info fetch itself failed; run it again from scratch
            tracing::info!(item = %id, "retrying catalog fetch");
            item.status = ItemStatus::FetchingInfo;
            let fetch_id = item.id.clone();
            self.persist_and_broadcast();
            self.spawn_info_fetch(fetch_id);
            return;
        }
        item.status = ItemStatus::Pending;
        for file in &mut item.files {
            if file.status == FileStatus::Error {
                file.status = FileStatus::Pending;
            }
        }
        tracing::info!(item = %id, "retrying failed files");
        self.persist_and_broadcast();
    }

    fn clear_completed(&mut self) {
        let removed: Vec<String> = self
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
            .map(|item| item.id.clone())
            .collect();
        if removed.is_empty() {
            return;
        }
        self.items.retain(|item| item.status != ItemStatus::Completed);
        self.transfer_index
            .retain(|_, key| !removed.contains(&key.item_id));
        tracing::info!(count = removed.len(), "cleared completed items");
        self.persist_and_broadcast();
    }

    /// Admission control. Items are scanned strictly in queue order and
    /// the scan stops entirely once the transfer counter hits the limit:
    /// an earlier item's remaining files are always serviced before a
    /// later item begins, accepting that a large head item starves the
    /// tail under sustained load.
    async fn fill_transfer_slots(&mut self) {
        if self.shutdown {
            return;
        }
        let mut dirty = false;
        'scan: for item_idx in 0..self.items.len() {
            if !matches!(
                self.items[item_idx].status,
                ItemStatus::Pending | ItemStatus::Downloading
            ) {
                continue;
            }
            if let Some(settled) = derive_item_status(&self.items[item_idx].files) {
                self.items[item_idx].status = settled;
                dirty = true;
                continue;
            }
            if self.items[item_idx].status == ItemStatus::Pending {
                self.items[item_idx].status = ItemStatus::Downloading;
                dirty = true;
            }
            for file_idx in 0..self.items[item_idx].files.len() {
                if self.items[item_idx].files[file_idx].status != FileStatus::Pending {
                    continue;
                }
                if self.active_transfers >= self.concurrency_limit {
                    break 'scan;
                }
                self.dispatch_file(item_idx, file_idx).await;
                dirty = true;
            }
        }
        if dirty {
            self.persist_and_broadcast();
        }
    }

    async fn dispatch_file(&mut self, item_idx: usize, file_idx: usize) {
        let item_id = self.items[item_idx].id.clone();
        let (url, path) = {
            let file = &self.items[item_idx].files[file_idx];
            (file.url.clone(), file.path.clone())
        };

        // the slot is taken before the engine call returns, so the counter
        // never undercounts even against a synchronous completion
        self.items[item_idx].files[file_idx].status = FileStatus::Downloading;
        self.active_transfers += 1;

        let destination = if self.root.is_empty() {
            path
        } else {
            format!("{}/{path}", self.root)
        };
        let request = TransferRequest {
            url,
            destination,
            overwrite: true,
        };
        let engine = self.engine.clone();
        match engine.issue(request).await {
            Ok(transfer_id) => {
                tracing::debug!(
                    item = %item_id,
                    file = file_idx,
                    transfer = %transfer_id,
                    active = self.active_transfers,
                    "dispatched transfer"
                );
                let file = &mut self.items[item_idx].files[file_idx];
                if let Some(stale) = file.transfer_id.replace(transfer_id) {
                    self.transfer_index.remove(&stale);
                }
                self.transfer_index.insert(
                    transfer_id,
                    FileKey {
                        item_id,
                        file_idx,
                    },
                );
            }
            Err(err) => {
                tracing::warn!(item = %item_id, file = file_idx, error = %err, "engine rejected transfer");
                self.items[item_idx].files[file_idx].status = FileStatus::Error;
                self.active_transfers -= 1;
                if let Some(settled) = derive_item_status(&self.items[item_idx].files) {
                    self.items[item_idx].status = settled;
                }
            }
        }
    }

    async fn handle_transfer_event(&mut self, update: TransferUpdate) {
        tracing::debug!(transfer = %update.id, state = ?update.state, "engine event");
        match self.transfer_index.get(&update.id).cloned() {
            Some(key) => match update.state {
                // progress reports for known transfers carry nothing new
                TransferState::Downloading => {}
                TransferState::Complete => self.finish_transfer(&key, true),
                TransferState::Interrupted => self.finish_transfer(&key, false),
            },
            None => self.recover_orphan(update).await,
        }
    }

    /// Terminal bookkeeping for one file. Idempotent per identifier: a
    /// duplicate terminal report for an already-terminal file changes
    /// nothing, and the slot is only released if this file actually held
    /// one (it may have been adopted after a restart without ever being
    /// dispatched by us).
    fn finish_transfer(&mut self, key: &FileKey, success: bool) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == key.item_id) else {
            tracing::debug!(item = %key.item_id, "terminal event for a removed item, dropping");
            return;
        };
        let Some(file) = item.files.get_mut(key.file_idx) else {
            return;
        };
        if file.status.is_terminal() {
            tracing::debug!(item = %item.id, file = key.file_idx, "transfer already terminal, ignoring duplicate event");
            return;
        }
        if file.status == FileStatus::Downloading {
            self.active_transfers = self.active_transfers.saturating_sub(1);
        }
        file.status = if success {
            FileStatus::Completed
        } else {
            FileStatus::Error
        };
        if success {
            item.completed_files += 1;
        }
        item.recompute_progress();
        if let Some(settled) = derive_item_status(&item.files) {
            item.status = settled;
            tracing::info!(
                item = %item.id,
                status = ?settled,
                completed = item.completed_files,
                total = item.total_files,
                "item settled"
            );
        }
        self.persist_and_broadcast();
    }

    /// An unknown identifier usually means the engine restarted one of our
    /// transfers under a fresh id. Resolve its URL, hand the new id to the
    /// first non-completed file carrying that URL, and apply the reported
    /// state; an event that resolves to nothing belongs to a transfer
    /// outside this queue and is dropped.
    async fn recover_orphan(&mut self, update: TransferUpdate) {
        let engine = self.engine.clone();
        let Some(probe) = engine.lookup(update.id).await else {
            tracing::debug!(transfer = %update.id, "event for an unknown transfer, dropping");
            return;
        };
        let Some(key) = self.find_adoptable_file(&probe.url) else {
            tracing::debug!(transfer = %update.id, url = %probe.url, "no queued file matches orphan transfer, dropping");
            return;
        };
        tracing::info!(
            transfer = %update.id,
            item = %key.item_id,
            file = key.file_idx,
            "adopting engine-restarted transfer"
        );
        {
            let Some(item) = self.items.iter_mut().find(|item| item.id == key.item_id) else {
                return;
            };
            let Some(file) = item.files.get_mut(key.file_idx) else {
                return;
            };
            if let Some(stale) = file.transfer_id.replace(update.id) {
                self.transfer_index.remove(&stale);
            }
            self.transfer_index.insert(update.id, key.clone());
            if probe.state == TransferState::Downloading {
                if file.status != FileStatus::Downloading {
                    // the adopted transfer occupies engine capacity like
                    // one we issued ourselves
                    file.status = FileStatus::Downloading;
                    self.active_transfers += 1;
                }
            } else if file.status == FileStatus::Error {
                // a fresh identifier re-reporting a file we had written
                // off is not a duplicate; let settlement run again
                file.status = FileStatus::Pending;
            }
        }
        match probe.state {
            TransferState::Downloading => self.persist_and_broadcast(),
            TransferState::Complete => self.finish_transfer(&key, true),
            TransferState::Interrupted => self.finish_transfer(&key, false),
        }
    }

    fn find_adoptable_file(&self, url: &str) -> Option<FileKey> {
        for item in &self.items {
            for (file_idx, file) in item.files.iter().enumerate() {
                if file.url == url && file.status != FileStatus::Completed {
                    return Some(FileKey {
                        item_id: item.id.clone(),
                        file_idx,
                    });
                }
            }
        }
        None
    }

    fn rebuild_transfer_index(&mut self) {
        self.transfer_index.clear();
        for item in &self.items {
            for (file_idx, file) in item.files.iter().enumerate() {
                if let Some(id) = file.transfer_id {
                    self.transfer_index.insert(
                        id,
                        FileKey {
                            item_id: item.id.clone(),
                            file_idx,
                        },
                    );
                }
            }
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.clone(),
            root: self.root.clone(),
        }
    }

    fn persist_and_broadcast(&mut self) {
        let state = PersistedState {
            version: STATE_VERSION,
            items: self.items.clone(),
            root: self.root.clone(),
        };
        if let Err(err) = self.disk.save_state(&state) {
            tracing::error!(error = %format!("{err:#}"), "failed to persist queue state");
        }
        let _ = self.snapshot_tx.send(self.snapshot());
    }
}
