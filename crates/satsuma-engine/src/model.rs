use satsuma_core::TransferId;

/// What the queue hands the engine for one file transfer. `destination` is
/// a sanitized path relative to the engine's download directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    pub destination: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Downloading,
    Complete,
    Interrupted,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Interrupted)
    }
}

/// One engine state-change report, keyed by the engine's own identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferUpdate {
    pub id: TransferId,
    pub state: TransferState,
}

/// Answer to a `lookup` probe for an identifier the queue does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProbe {
    pub url: String,
    pub state: TransferState,
}
