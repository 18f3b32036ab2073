use serde::{Deserialize, Serialize};

use satsuma_core::QueueItem;

/// What every observer sees: the full queue plus the download root.
/// Broadcast after each state change; observers converge to the latest one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub root: String,
}
