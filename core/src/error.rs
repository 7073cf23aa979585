use driftbase_proto::{EntityId, TxId};
use thiserror::Error;

/// Errors raised by the Triple Store (spec §7, categories 1 and 3).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open local store at {path}: {source}")]
    Open { path: String, #[source] source: sled::Error },

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),

    #[error("invalid query: {0}")]
    Query(#[from] driftql::QueryError),
}

/// Validation errors (spec §7, category 2): malformed input rejected before
/// any state change.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("operation batch must not be empty")]
    EmptyBatch,
    #[error("could not recover a usable entity id from `{0}`")]
    UnrecoverableEntityId(String),
}

#[derive(Debug, Error)]
pub enum TransactError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
