mod command;
mod coordinator;
mod error;
mod status;

pub use crate::command::{QueueCommand, SelectedFile};
pub use crate::coordinator::{QueueCoordinator, QueueHandle};
pub use crate::error::QueueError;
pub use crate::status::QueueSnapshot;
