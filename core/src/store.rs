//! The Triple Store (spec §4.1): durable EAV storage, change notification,
//! and atomic transaction application.
//!
//! Unlike the teacher's `StorageEngine` trait, this store is a concrete
//! `sled`-backed type rather than a generic-over-backend abstraction — spec
//! §6.2 names `sled`-shaped persistence but explicitly puts "on-disk engine
//! choice" out of scope, so there is no pluggable-backend surface to design
//! for (see DESIGN.md).

use chrono::Utc;
use dashmap::DashMap;
use driftbase_proto::{value::TYPE_ATTR, AttrName, EntityId, Namespace, Operation, Transaction, TransactionStatus, TxId, Value};
use driftql::{apply_aggregate, matches, parse_order, sort_by_keys, Filterable};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::Mutex,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    triple::{ChangeKind, Triple, TripleChange},
};

const TRIPLES_TREE: &str = "triples";
const TRANSACTIONS_TREE: &str = "transactions";
const CHANGE_CHANNEL_CAPACITY: usize = 4096;

/// A materialized entity: its attributes (always including `id`), keyed by
/// attribute name. Used both as the Query Engine's projection and as the
/// `Filterable` row for `driftql`.
pub type Entity = BTreeMap<AttrName, Value>;

#[derive(Clone)]
struct EntityRow<'a>(&'a Entity);
impl Filterable for EntityRow<'_> {
    fn get(&self, name: &str) -> Option<&Value> { self.0.get(name) }
}

fn triple_key(entity_id: EntityId, attr: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 1 + attr.len());
    key.extend_from_slice(entity_id.0.as_bytes());
    key.push(0);
    key.extend_from_slice(attr.as_bytes());
    key
}

pub struct TripleStore {
    triples_tree: sled::Tree,
    tx_tree: sled::Tree,
    entities: DashMap<EntityId, Entity>,
    pending_order: Mutex<Vec<TxId>>,
    changes: broadcast::Sender<TripleChange>,
}

impl TripleStore {
    /// Open (or create) the durable store under `persistence_dir` (spec
    /// §6.2, §6.3 `persistence_dir`).
    pub fn open(persistence_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(persistence_dir).map_err(|e| StoreError::Open { path: persistence_dir.display().to_string(), source: e.into() })?;
        let db = sled::open(persistence_dir).map_err(|e| StoreError::Open { path: persistence_dir.display().to_string(), source: e })?;
        Self::from_db(db)
    }

    /// In-memory, ephemeral store for tests and `sync_enabled = false` demos.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).flush_every_ms(None).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let triples_tree = db.open_tree(TRIPLES_TREE)?;
        let tx_tree = db.open_tree(TRANSACTIONS_TREE)?;
        let entities = DashMap::new();

        for item in triples_tree.iter() {
            let (_, value) = item?;
            let triple: Triple = bincode::deserialize(&value)?;
            entities.entry(triple.entity_id).or_insert_with(BTreeMap::new).insert(triple.attribute.clone(), triple.value.clone());
        }

        let mut pending: Vec<Transaction> = Vec::new();
        for item in tx_tree.iter() {
            let (_, value) = item?;
            let tx: Transaction = bincode::deserialize(&value)?;
            if tx.status == TransactionStatus::Pending {
                pending.push(tx);
            }
        }
        pending.sort_by_key(|tx| tx.created_at);
        let pending_order = Mutex::new(pending.into_iter().map(|tx| tx.tx_id).collect());

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { triples_tree, tx_tree, entities, pending_order, changes })
    }

    /// Subscribe to the commit-ordered stream of triple changes (spec §4.1 `changes`).
    pub fn changes(&self) -> broadcast::Receiver<TripleChange> { self.changes.subscribe() }

    /// Apply every operation in `tx` under a single durable write unit
    /// (invariant 3). On any error, nothing is written and the store is
    /// left exactly as it was.
    pub fn apply_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut effects: Vec<(Triple, ChangeKind)> = Vec::new();
        let mut deletions: Vec<(EntityId, Vec<(AttrName, Value)>)> = Vec::new();

        for op in &tx.operations {
            match op {
                Operation::Add { entity_id, data, namespace } => {
                    effects.push((
                        Triple {
                            entity_id: *entity_id,
                            attribute: TYPE_ATTR.to_string(),
                            value: Value::String(namespace.clone()),
                            tx_provenance: tx.tx_id,
                            created_at: tx.created_at.timestamp_millis(),
                        },
                        ChangeKind::Add,
                    ));
                    for (attr, value) in data {
                        if attr == TYPE_ATTR {
                            continue;
                        }
                        effects.push((
                            Triple {
                                entity_id: *entity_id,
                                attribute: attr.clone(),
                                value: value.clone(),
                                tx_provenance: tx.tx_id,
                                created_at: tx.created_at.timestamp_millis(),
                            },
                            ChangeKind::Add,
                        ));
                    }
                }
                Operation::Update { entity_id, data, .. } => {
                    for (attr, value) in data {
                        if attr == TYPE_ATTR {
                            continue;
                        }
                        effects.push((
                            Triple {
                                entity_id: *entity_id,
                                attribute: attr.clone(),
                                value: value.clone(),
                                tx_provenance: tx.tx_id,
                                created_at: tx.created_at.timestamp_millis(),
                            },
                            ChangeKind::Update,
                        ));
                    }
                }
                Operation::Delete { entity_id, .. } => {
                    let attrs: Vec<(AttrName, Value)> =
                        self.entities.get(entity_id).map(|e| e.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default();
                    deletions.push((*entity_id, attrs));
                }
            }
        }

        // Commit to the durable tree first; only touch in-memory state and
        // fire change events once the write is known-durable.
        let mut batch = sled::Batch::default();
        for (triple, _) in &effects {
            batch.insert(triple_key(triple.entity_id, &triple.attribute), bincode::serialize(triple)?);
        }
        for (entity_id, attrs) in &deletions {
            for (attr, _) in attrs {
                batch.remove(triple_key(*entity_id, attr));
            }
        }
        self.triples_tree.apply_batch(batch)?;

        if tx.status == TransactionStatus::Pending {
            self.persist_pending(tx)?;
        }

        for (triple, kind) in effects {
            self.entities.entry(triple.entity_id).or_insert_with(BTreeMap::new).insert(triple.attribute.clone(), triple.value.clone());
            self.broadcast(kind, triple);
        }
        for (entity_id, attrs) in deletions {
            self.entities.remove(&entity_id);
            for (attribute, value) in attrs {
                self.broadcast(
                    ChangeKind::Delete,
                    Triple { entity_id, attribute, value, tx_provenance: tx.tx_id, created_at: tx.created_at.timestamp_millis() },
                );
            }
        }

        debug!(tx_id = %tx.tx_id, ops = tx.operations.len(), "applied transaction");
        Ok(())
    }

    fn broadcast(&self, kind: ChangeKind, triple: Triple) {
        // No active subscribers is not an error; the store doesn't care who's listening.
        let _ = self.changes.send(TripleChange { kind, triple });
    }

    fn persist_pending(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.tx_tree.insert(tx.tx_id.0.as_bytes(), bincode::serialize(tx)?)?;
        self.pending_order.lock().unwrap().push(tx.tx_id);
        Ok(())
    }

    /// Best-effort safety net (spec §4.1): removes triples provenanced to
    /// `tx_id` if that transaction was never durably marked `synced`. Because
    /// `apply_transaction` only returns once its batch is durable, this is a
    /// no-op in the common path — it exists for callers that applied
    /// speculatively outside the normal `transact` flow.
    pub fn rollback_transaction(&self, tx_id: TxId) {
        if let Ok(Some(bytes)) = self.tx_tree.get(tx_id.0.as_bytes()) {
            if let Ok(tx) = bincode::deserialize::<Transaction>(&bytes) {
                if tx.status == TransactionStatus::Synced {
                    return;
                }
            }
        }

        // Entities don't carry per-attribute provenance in memory (only the
        // durable triple does); scan the tree directly for this rare path.
        let mut batch = sled::Batch::default();
        for item in self.triples_tree.iter().flatten() {
            let (key, value) = item;
            if let Ok(triple) = bincode::deserialize::<Triple>(&value) {
                if triple.tx_provenance == tx_id {
                    batch.remove(key);
                    if let Some(mut entity) = self.entities.get_mut(&triple.entity_id) {
                        entity.remove(&triple.attribute);
                    }
                }
            }
        }
        if let Err(e) = self.triples_tree.apply_batch(batch) {
            warn!(%tx_id, error = %e, "rollback_transaction: failed to remove provenanced triples");
        }
        self.pending_order.lock().unwrap().retain(|id| *id != tx_id);
    }

    /// Transition a `pending` transaction to `synced`, then prune it: spec
    /// §3.3 "a durable record is kept until synced", after which it's
    /// eligible for pruning.
    pub fn mark_transaction_synced(&self, tx_id: TxId) -> Result<(), StoreError> {
        self.tx_tree.remove(tx_id.0.as_bytes())?;
        self.pending_order.lock().unwrap().retain(|id| *id != tx_id);
        Ok(())
    }

    /// Look up a transaction by id, pending or not-yet-pruned. Used by
    /// callers that need the full operation list after `apply_transaction`
    /// already consumed it (spec §4.4.2 outbound translation).
    pub fn get_transaction(&self, tx_id: TxId) -> Option<Transaction> {
        self.tx_tree.get(tx_id.0.as_bytes()).ok().flatten().and_then(|bytes| bincode::deserialize(&bytes).ok())
    }

    /// Ordered list of pending transactions, for replay on sync start (spec §4.4.1).
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        let order = self.pending_order.lock().unwrap();
        order
            .iter()
            .filter_map(|tx_id| {
                self.tx_tree.get(tx_id.0.as_bytes()).ok().flatten().and_then(|bytes| bincode::deserialize::<Transaction>(&bytes).ok())
            })
            .collect()
    }

    pub fn get_entity_type(&self, entity_id: EntityId) -> Option<Namespace> {
        self.entities.get(&entity_id).and_then(|e| e.get(TYPE_ATTR)).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.triples_tree.clear()?;
        self.tx_tree.clear()?;
        self.entities.clear();
        self.pending_order.lock().unwrap().clear();
        Ok(())
    }

    /// Materialize, filter, sort, page, and optionally aggregate entities of
    /// `namespace` (spec §4.1).
    #[allow(clippy::too_many_arguments)]
    pub fn query_entities(
        &self,
        namespace: &str,
        where_clause: Option<&Value>,
        order_by: Option<&Value>,
        limit: Option<usize>,
        offset: Option<usize>,
        aggregate: Option<&[driftql::AggregateField]>,
        group_by: &[String],
    ) -> Result<Vec<Entity>, StoreError> {
        let mut entities: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| e.value().get(TYPE_ATTR).and_then(Value::as_str) == Some(namespace))
            .map(|e| {
                let mut row = e.value().clone();
                row.insert("id".to_string(), Value::String(e.key().to_string()));
                row
            })
            .collect();

        if let Some(where_clause) = where_clause {
            entities.retain(|e| matches(&EntityRow(e), where_clause));
        }

        if let Some(order_value) = order_by {
            let keys = parse_order(order_value)?;
            let mut rows: Vec<EntityRowOwned> = entities.into_iter().map(EntityRowOwned).collect();
            sort_by_keys(&mut rows, &keys);
            entities = rows.into_iter().map(|r| r.0).collect();
        }

        let offset = offset.unwrap_or(0);
        entities = entities.into_iter().skip(offset).collect();
        if let Some(limit) = limit {
            entities.truncate(limit);
        }

        if let Some(fields) = aggregate {
            let maps: Vec<serde_json::Map<String, Value>> = entities.into_iter().map(|e| e.into_iter().collect()).collect();
            let reduced = apply_aggregate(&maps, fields, group_by);
            return Ok(reduced.into_iter().map(|m| m.into_iter().collect()).collect());
        }

        Ok(entities)
    }
}

#[derive(Clone)]
struct EntityRowOwned(Entity);
impl Filterable for EntityRowOwned {
    fn get(&self, name: &str) -> Option<&Value> { self.0.get(name) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap as Map;

    fn store() -> TripleStore { TripleStore::open_temporary().unwrap() }

    fn add_tx(entity_id: EntityId, namespace: &str, data: Map<String, Value>) -> Transaction {
        Transaction::new_pending(TxId::new(), vec![Operation::Add { namespace: namespace.to_string(), entity_id, data }], Utc::now())
    }

    #[test]
    fn add_then_query_entities() {
        let store = store();
        let id = EntityId::new();
        let mut data = Map::new();
        data.insert("text".to_string(), json!("a"));
        data.insert("completed".to_string(), json!(false));
        store.apply_transaction(&add_tx(id, "todos", data)).unwrap();

        let rows = store.query_entities("todos", None, None, None, None, None, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["text"], json!("a"));
        assert_eq!(rows[0]["__type"], json!("todos"));
    }

    #[test]
    fn update_preserves_omitted_attributes() {
        let store = store();
        let id = EntityId::new();
        let mut data = Map::new();
        data.insert("text".to_string(), json!("a"));
        data.insert("completed".to_string(), json!(false));
        store.apply_transaction(&add_tx(id, "todos", data)).unwrap();

        let mut update_data = Map::new();
        update_data.insert("completed".to_string(), json!(true));
        let update_tx = Transaction::new_pending(
            TxId::new(),
            vec![Operation::Update { namespace: "todos".to_string(), entity_id: id, data: update_data }],
            Utc::now(),
        );
        store.apply_transaction(&update_tx).unwrap();

        let rows = store.query_entities("todos", None, None, None, None, None, &[]).unwrap();
        assert_eq!(rows[0]["completed"], json!(true));
        assert_eq!(rows[0]["text"], json!("a"));
    }

    #[test]
    fn delete_removes_all_triples() {
        let store = store();
        let id = EntityId::new();
        let mut data = Map::new();
        data.insert("text".to_string(), json!("a"));
        store.apply_transaction(&add_tx(id, "todos", data)).unwrap();

        let del_tx = Transaction::new_pending(TxId::new(), vec![Operation::Delete { entity_id: id, namespace: Some("todos".to_string()) }], Utc::now());
        store.apply_transaction(&del_tx).unwrap();

        let rows = store.query_entities("todos", None, None, None, None, None, &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn delete_nonexistent_is_a_noop() {
        let store = store();
        let del_tx = Transaction::new_pending(TxId::new(), vec![Operation::Delete { entity_id: EntityId::new(), namespace: None }], Utc::now());
        assert!(store.apply_transaction(&del_tx).is_ok());
    }

    #[test]
    fn offset_beyond_length_yields_empty() {
        let store = store();
        let id = EntityId::new();
        let mut data = Map::new();
        data.insert("text".to_string(), json!("a"));
        store.apply_transaction(&add_tx(id, "todos", data)).unwrap();

        let rows = store.query_entities("todos", None, None, None, Some(50), None, &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn pending_transactions_survive_and_are_prunable() {
        let store = store();
        let id = EntityId::new();
        let mut data = Map::new();
        data.insert("text".to_string(), json!("a"));
        let tx = add_tx(id, "todos", data);
        store.apply_transaction(&tx).unwrap();

        assert_eq!(store.get_pending_transactions().len(), 1);
        store.mark_transaction_synced(tx.tx_id).unwrap();
        assert_eq!(store.get_pending_transactions().len(), 0);
    }
}
