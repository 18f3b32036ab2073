use thiserror::Error;

use satsuma_catalog::CatalogError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is shutting down")]
    Shutdown,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
