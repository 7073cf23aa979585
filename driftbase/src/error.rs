use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to open local store: {0}")]
    Store(#[from] driftbase_core::StoreError),

    #[error(transparent)]
    Transact(#[from] driftbase_core::TransactError),
}
