use thiserror::Error;

/// Sync Engine errors (spec §7, categories 4–5). Per "propagation policy",
/// these never reach the application — `SyncEngine` absorbs and logs them —
/// but they're a real type so internal plumbing stays `?`-friendly.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("store error: {0}")]
    Store(#[from] driftbase_core::StoreError),

    #[error("transact error: {0}")]
    Transact(#[from] driftbase_core::TransactError),

    #[error("malformed server frame: {0}")]
    Malformed(String),
}
