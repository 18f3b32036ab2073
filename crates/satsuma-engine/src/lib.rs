mod error;
mod http;
mod model;

pub use crate::error::EngineError;
pub use crate::http::HttpDownloadEngine;
pub use crate::model::{TransferProbe, TransferRequest, TransferState, TransferUpdate};

use satsuma_core::TransferId;

/// The external downloading subsystem: accepts `{url, destination}`
/// requests, answers with an opaque transfer identifier, and reports state
/// transitions asynchronously over an event channel it was built with.
/// `lookup` resolves an identifier the queue has never seen, which happens
/// when the engine restarts an interrupted transfer under a fresh id.
#[async_trait::async_trait]
pub trait DownloadEngine: Send + Sync {
    async fn issue(&self, request: TransferRequest) -> Result<TransferId, EngineError>;

    async fn lookup(&self, id: TransferId) -> Option<TransferProbe>;
}
