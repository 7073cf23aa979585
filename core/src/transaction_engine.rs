//! The Transaction Engine (spec §4.2): assigns `tx_id`s, applies locally,
//! and repairs corrupted entity ids on `delete` before they ever reach the
//! Triple Store.

use std::sync::Arc;

use chrono::Utc;
use driftbase_proto::{AttrName, EntityId, Namespace, Operation, Transaction, TransactionResult, TransactionStatus, TxId, Value};
use uuid::Uuid;

use crate::{error::ValidationError, error::TransactError, store::TripleStore};

/// Operation as received from the application, before entity ids are
/// sanitized and before a `tx_id` has been assigned. `Delete` carries a raw
/// string because callers occasionally hand back a malformed id (spec
/// §4.2 "migration aid for data authored by earlier versions").
#[derive(Debug, Clone)]
pub enum OpInput {
    Add { namespace: Namespace, entity_id: EntityId, data: std::collections::BTreeMap<AttrName, Value> },
    Update { namespace: Namespace, entity_id: EntityId, data: std::collections::BTreeMap<AttrName, Value> },
    Delete { entity_id: String },
}

const UUID_LEN: usize = 36;

/// Repairs a possibly-corrupted delete id (spec §4.2). Tries, in order:
/// 1. the id parses directly as a UUID;
/// 2. the id looks like a JSON array and its first element is a UUID;
/// 3. the id contains a UUID-v4-shaped substring anywhere within it.
fn sanitize_entity_id(raw: &str) -> Result<EntityId, ValidationError> {
    if let Ok(uuid) = Uuid::parse_str(raw.trim()) {
        return Ok(EntityId::from_uuid(uuid));
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(elements) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            if let Some(first) = elements.first().and_then(serde_json::Value::as_str) {
                if let Ok(uuid) = Uuid::parse_str(first.trim()) {
                    return Ok(EntityId::from_uuid(uuid));
                }
            }
        }
    }

    if raw.len() >= UUID_LEN {
        for start in 0..=(raw.len() - UUID_LEN) {
            if !raw.is_char_boundary(start) || !raw.is_char_boundary(start + UUID_LEN) {
                continue;
            }
            if let Ok(uuid) = Uuid::parse_str(&raw[start..start + UUID_LEN]) {
                return Ok(EntityId::from_uuid(uuid));
            }
        }
    }

    Err(ValidationError::UnrecoverableEntityId(raw.to_string()))
}

pub struct TransactionEngine {
    store: Arc<TripleStore>,
}

impl TransactionEngine {
    pub fn new(store: Arc<TripleStore>) -> Self { Self { store } }

    /// Assigns a `tx_id`, applies locally under one write unit, and returns
    /// before remote acknowledgement (spec §4.2). On local apply failure,
    /// rolls back and propagates the error without appending to the sync
    /// queue — the caller (sync engine wiring) is responsible for that step.
    pub fn transact(&self, ops: Vec<OpInput>) -> Result<TransactionResult, TransactError> {
        if ops.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }

        let mut operations = Vec::with_capacity(ops.len());
        for op in ops {
            operations.push(match op {
                OpInput::Add { namespace, entity_id, data } => Operation::Add { namespace, entity_id, data },
                OpInput::Update { namespace, entity_id, data } => Operation::Update { namespace, entity_id, data },
                OpInput::Delete { entity_id } => {
                    let entity_id = sanitize_entity_id(&entity_id)?;
                    // Snapshot the namespace before `apply_transaction` below removes
                    // the entity's triples (including `__type`) — afterward there is
                    // nothing left in the store to ask.
                    let namespace = self.store.get_entity_type(entity_id);
                    Operation::Delete { entity_id, namespace }
                }
            });
        }

        let tx_id = TxId::new();
        let created_at = Utc::now();
        let tx = Transaction::new_pending(tx_id, operations, created_at);

        if let Err(e) = self.store.apply_transaction(&tx) {
            self.store.rollback_transaction(tx_id);
            return Err(e.into());
        }

        Ok(TransactionResult { tx_id, status: TransactionStatus::Pending, created_at })
    }

    /// Used when applying a transaction that originates remotely: already
    /// has a `tx_id` and is recorded as `synced` from the start (spec §3.3).
    pub fn apply_remote(&self, tx_id: TxId, operations: Vec<Operation>, created_at: chrono::DateTime<Utc>) -> Result<(), TransactError> {
        let tx = Transaction::new_synced(tx_id, operations, created_at);
        self.store.apply_transaction(&tx).map_err(TransactError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> TransactionEngine { TransactionEngine::new(Arc::new(TripleStore::open_temporary().unwrap())) }

    #[test]
    fn empty_batch_is_rejected() {
        let engine = engine();
        let err = engine.transact(vec![]).unwrap_err();
        assert!(matches!(err, TransactError::Validation(ValidationError::EmptyBatch)));
    }

    #[test]
    fn add_assigns_tx_id_and_applies() {
        let engine = engine();
        let entity_id = EntityId::new();
        let mut data = std::collections::BTreeMap::new();
        data.insert("text".to_string(), json!("hello"));
        let result = engine.transact(vec![OpInput::Add { namespace: "todos".to_string(), entity_id, data }]).unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
    }

    #[test]
    fn delete_with_clean_uuid_string_succeeds() {
        let engine = engine();
        let id = EntityId::new();
        let result = engine.transact(vec![OpInput::Delete { entity_id: id.to_string() }]).unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
    }

    #[test]
    fn delete_with_json_array_wrapped_id_is_repaired() {
        let engine = engine();
        let id = EntityId::new();
        let wrapped = format!("[\"{id}\", \"stray\"]");
        let result = engine.transact(vec![OpInput::Delete { entity_id: wrapped }]).unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
    }

    #[test]
    fn delete_with_embedded_uuid_substring_is_repaired() {
        let engine = engine();
        let id = EntityId::new();
        let noisy = format!("entity:{id}:legacy");
        let result = engine.transact(vec![OpInput::Delete { entity_id: noisy }]).unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
    }

    #[test]
    fn delete_with_unrecoverable_id_is_rejected() {
        let engine = engine();
        let err = engine.transact(vec![OpInput::Delete { entity_id: "not-an-id-at-all".to_string() }]).unwrap_err();
        assert!(matches!(err, TransactError::Validation(ValidationError::UnrecoverableEntityId(_))));
    }
}
