use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use satsuma_catalog::{CatalogError, TrackNode};
use satsuma_core::FileEntry;

use crate::status::QueueSnapshot;

/// One file an observer picked out of a track tree when adding an item
/// with an explicit selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedFile {
    pub url: String,
    pub path: String,
}

#[derive(Debug)]
pub enum QueueCommand {
    Add {
        id: String,
        files: Option<Vec<SelectedFile>>,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Pause {
        id: String,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Resume {
        id: String,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Retry {
        id: String,
        reply: oneshot::Sender<QueueSnapshot>,
    },
    ClearCompleted {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    GetQueue {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    GetTracks {
        id: String,
        reply: oneshot::Sender<Result<Vec<TrackNode>, CatalogError>>,
    },
    UpdateSettings {
        root: String,
        reply: oneshot::Sender<String>,
    },
    /// Internal: a spawned catalog fetch resolved (or failed) for an item
    /// that was added without an explicit selection.
    InfoFetched {
        id: String,
        result: Result<Vec<FileEntry>, CatalogError>,
    },
    Shutdown,
}
