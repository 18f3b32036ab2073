mod models;
mod path;

pub use crate::models::{
    FileEntry, FileStatus, ItemStatus, QueueItem, TransferId, derive_item_status, progress_percent,
};
pub use crate::path::{sanitize_root, sanitize_segment};
