use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Opaque identifier minted by the download engine for one in-flight
/// transfer. The engine may retire an identifier and restart the same
/// transfer under a new one; the queue reconciles that by URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    FetchingInfo,
    Pending,
    Downloading,
    Paused,
    Completed,
    Error,
}

/// Files never pause; pausing is item-level only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Downloading,
    Completed,
    Error,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Error)
    }
}

/// One downloadable unit within a queue item. `path` is computed once from
/// the catalog tree (prefixed with the item id) and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub url: String,
    pub path: String,
    pub status: FileStatus,
    pub transfer_id: Option<TransferId>,
}

impl FileEntry {
    pub fn new(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            status: FileStatus::Pending,
            transfer_id: None,
        }
    }
}

/// One requested multi-file asset tracked in the queue, keyed by its
/// catalog id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub status: ItemStatus,
    pub files: Vec<FileEntry>,
    pub total_files: u32,
    pub completed_files: u32,
    pub progress: u32,
    pub added_time: SystemTime,
}

impl QueueItem {
    /// Placeholder inserted while the catalog tree is being resolved.
    pub fn fetching(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::FetchingInfo,
            files: Vec::new(),
            total_files: 0,
            completed_files: 0,
            progress: 0,
            added_time: SystemTime::now(),
        }
    }

    /// Item created from an explicit file selection, ready for scheduling.
    pub fn with_files(id: impl Into<String>, files: Vec<FileEntry>) -> Self {
        let total_files = files.len() as u32;
        Self {
            id: id.into(),
            status: ItemStatus::Pending,
            files,
            total_files,
            completed_files: 0,
            progress: 0,
            added_time: SystemTime::now(),
        }
    }

    pub fn recompute_progress(&mut self) {
        self.progress = progress_percent(self.completed_files, self.total_files);
    }
}

/// Integer percentage, floored; 0 when there are no files at all.
pub fn progress_percent(completed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    completed * 100 / total
}

/// The single place item terminal status is derived from file statuses:
/// `Completed` iff every file completed, `Error` iff every file is terminal
/// but not all completed, `None` while any file is still in flight.
///
/// An empty file list yields `None`: it only occurs before the catalog
/// fetch resolves, and settling it is the fetch handler's decision.
pub fn derive_item_status(files: &[FileEntry]) -> Option<ItemStatus> {
    if files.is_empty() {
        return None;
    }
    if !files.iter().all(|f| f.status.is_terminal()) {
        return None;
    }
    if files.iter().all(|f| f.status == FileStatus::Completed) {
        Some(ItemStatus::Completed)
    } else {
        Some(ItemStatus::Error)
    }
}
