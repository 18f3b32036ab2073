use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unrecognized catalog id: {0}")]
    NotFound(String),

    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("catalog returned status {0}")]
    Status(reqwest::StatusCode),
}
