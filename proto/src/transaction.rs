use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{id::TxId, operation::Operation};

/// (spec §3.1, §3.3). `Pending` transactions are durable across restarts;
/// remote-originated transactions are created directly as `Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Synced,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: TxId,
    pub operations: Vec<Operation>,
    pub created_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn new_pending(tx_id: TxId, operations: Vec<Operation>, created_at: DateTime<Utc>) -> Self {
        Self { tx_id, operations, created_at, status: TransactionStatus::Pending }
    }

    pub fn new_synced(tx_id: TxId, operations: Vec<Operation>, created_at: DateTime<Utc>) -> Self {
        Self { tx_id, operations, created_at, status: TransactionStatus::Synced }
    }
}

/// Result handed back to the caller of `transact` (spec §4.2). Only ever
/// `Pending` or `Failed` — `Synced` is observed later, via the durable log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub tx_id: TxId,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}
