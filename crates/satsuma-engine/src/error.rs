use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid transfer url: {0}")]
    InvalidUrl(String),

    #[error("engine rejected transfer: {0}")]
    Rejected(String),
}
