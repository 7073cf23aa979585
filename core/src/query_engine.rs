//! The Query Engine (spec §4.3): at-most-one compiled subscription per
//! distinct query description, a synchronous remote-cache fast path,
//! include expansion, and debounced invalidation on store changes.

use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::DashMap;
use driftbase_proto::{value::TYPE_ATTR, EntityId, Value};
use driftql::{NamespaceQuery, QueryDescription};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::StoreError,
    observable::{Observable, ObservableWriter, QueryState},
    store::{Entity, TripleStore},
    triple::TripleChange,
};

/// Result of a compiled query: one entity list per top-level namespace.
pub type QueryResult = std::collections::BTreeMap<String, Vec<Entity>>;

/// The Query Engine's view of the Sync Engine (spec §4.3 "asks the Sync
/// Engine for any cached remote collection result" / "asks the Sync Engine
/// to send the query upstream"). Implemented by `driftbase-sync`; kept as a
/// trait here so `driftbase-core` never depends on the sync crate.
pub trait RemoteQueryCache: Send + Sync {
    fn cached_collection(&self, namespace: &str) -> Option<Vec<Entity>>;
    fn subscribe_query(&self, cache_key: &str, description: &Value);
}

struct CacheEntry {
    writer: ObservableWriter<QueryResult>,
    handle: Observable<QueryResult>,
    description: QueryDescription,
}

struct Inner {
    store: Arc<TripleStore>,
    remote: Option<Arc<dyn RemoteQueryCache>>,
    cache: DashMap<String, CacheEntry>,
}

pub struct QueryEngine {
    inner: Arc<Inner>,
}

/// Deterministic id for the synthetic invalidation entity (spec §4.3): a
/// fixed name, not an id anyone ever creates through `transact`, so it's
/// derived once via UUID v5 rather than stored anywhere.
pub fn invalidation_sentinel_id() -> EntityId {
    EntityId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, driftbase_proto::value::INVALIDATION_SENTINEL_ENTITY.as_bytes()))
}

impl QueryEngine {
    pub fn new(store: Arc<TripleStore>, remote: Option<Arc<dyn RemoteQueryCache>>) -> Self {
        let inner = Arc::new(Inner { store, remote, cache: DashMap::new() });
        let invalidator_inner = Arc::clone(&inner);
        tokio::spawn(async move { run_invalidator(invalidator_inner).await });
        Self { inner }
    }

    /// `query(desc)` (spec §4.3): returns the existing handle for this
    /// canonical key, or compiles and seeds a new one.
    pub fn query(&self, description: Value) -> Result<Observable<QueryResult>, StoreError> {
        let parsed = QueryDescription::parse(&description)?;
        let key = parsed.cache_key();

        if let Some(entry) = self.inner.cache.get(&key) {
            return Ok(entry.handle.clone());
        }

        let (writer, handle) = Observable::new(QueryState::Loading);
        let result = self.inner.execute(&parsed);
        writer.set(match &result {
            Ok(value) => QueryState::Success(value.clone()),
            Err(e) => QueryState::Error(e.to_string()),
        });

        if let Some(remote) = &self.inner.remote {
            remote.subscribe_query(&key, parsed.raw());
        }

        self.inner.cache.insert(key, CacheEntry { writer, handle: handle.clone(), description: parsed });
        Ok(handle)
    }

    /// Force every cached query to re-run now, bypassing the coalescing
    /// window. Used by the Sync Engine for a bare `refresh`/`refresh-query`
    /// that carries no result payload (spec §4.4.3) — there is no specific
    /// namespace to mark dirty, so every live subscription is re-evaluated.
    pub fn invalidate_all(&self) {
        let dirty = self.inner.all_cached_namespaces();
        self.inner.flush(&dirty);
    }
}

impl Inner {
    /// Evaluate a parsed description against local state, falling back to
    /// the Sync Engine's cached remote collection for any namespace the
    /// local store has nothing for yet (spec §4.3 synchronous fast path).
    fn execute(&self, parsed: &QueryDescription) -> Result<QueryResult, StoreError> {
        let mut result = QueryResult::new();
        for (namespace, nq) in &parsed.namespaces {
            let mut rows = self.store.query_entities(
                namespace,
                nq.where_clause.as_ref(),
                None,
                nq.limit,
                nq.offset,
                nq.aggregate.as_deref(),
                &nq.group_by,
            )?;
            if !nq.order_by.is_empty() {
                apply_order(&mut rows, &nq.order_by);
            }

            if rows.is_empty() {
                if let Some(remote) = &self.remote {
                    if let Some(cached) = remote.cached_collection(namespace) {
                        rows = apply_local_shape(cached, nq)?;
                    }
                }
            }

            for row in &mut rows {
                self.expand_includes(namespace, row, nq)?;
            }
            result.insert(namespace.clone(), rows);
        }
        Ok(result)
    }

    fn expand_includes(&self, parent_namespace: &str, row: &mut Entity, nq: &NamespaceQuery) -> Result<(), StoreError> {
        let parent_id = row.get("id").and_then(Value::as_str).map(str::to_string);
        for (relation, sub_raw) in &nq.include {
            let sub = QueryDescription::parse(&serde_json::json!({ relation.clone(): sub_raw }))?;
            let sub_nq = &sub.namespaces[relation];

            if driftql::is_plural(relation) {
                let Some(parent_id) = &parent_id else { continue };
                let fk = driftql::foreign_key_for_many(relation, parent_namespace);
                let mut where_clause = sub_nq.where_clause.clone().and_then(|v| v.as_object().cloned()).unwrap_or_default();
                where_clause.insert(fk, Value::String(parent_id.clone()));
                let children = self.store.query_entities(
                    relation,
                    Some(&Value::Object(where_clause)),
                    None,
                    sub_nq.limit,
                    sub_nq.offset,
                    sub_nq.aggregate.as_deref(),
                    &sub_nq.group_by,
                )?;
                let children = if !sub_nq.order_by.is_empty() {
                    let mut children = children;
                    apply_order(&mut children, &sub_nq.order_by);
                    children
                } else {
                    children
                };
                row.insert(relation.clone(), Value::Array(children.into_iter().map(|e| Value::Object(e.into_iter().collect())).collect()));
            } else {
                let target_ns = driftql::target_namespace_for_one(relation);
                let fk = driftql::parent_foreign_key_for_one(relation);
                let child = match row.get(&fk).and_then(Value::as_str) {
                    Some(child_id) => {
                        let mut where_clause = serde_json::Map::new();
                        where_clause.insert("id".to_string(), Value::String(child_id.to_string()));
                        self.store.query_entities(&target_ns, Some(&Value::Object(where_clause)), None, Some(1), None, None, &[])?.into_iter().next()
                    }
                    None => None,
                };
                row.insert(relation.clone(), child.map(|e| Value::Object(e.into_iter().collect())).unwrap_or(Value::Null));
            }
        }
        Ok(())
    }

    fn relevant_namespace(&self, change: &TripleChange) -> Option<String> {
        if change.triple.entity_id == invalidation_sentinel_id() {
            return None;
        }
        if change.triple.attribute == TYPE_ATTR {
            change.triple.value.as_str().map(str::to_string)
        } else {
            self.store.get_entity_type(change.triple.entity_id)
        }
    }

    fn all_cached_namespaces(&self) -> HashSet<String> {
        self.cache.iter().flat_map(|e| e.description.namespaces.keys().cloned().collect::<Vec<_>>()).collect()
    }

    fn flush(&self, dirty: &HashSet<String>) {
        let affected: Vec<String> = self
            .cache
            .iter()
            .filter(|e| e.description.namespaces.keys().any(|ns| dirty.contains(ns)))
            .map(|e| e.key().clone())
            .collect();

        for key in affected {
            let Some(entry) = self.cache.get(&key) else { continue };
            let result = self.execute(&entry.description);
            entry.writer.set(match result {
                Ok(value) => QueryState::Success(value),
                Err(e) => QueryState::Error(e.to_string()),
            });
            debug!(cache_key = %key, "re-ran query after invalidation");
        }
    }
}

fn apply_order(rows: &mut [Entity], order_by: &[driftql::OrderKey]) { driftql::sort_by_keys(rows, order_by) }

/// Apply a namespace's own `where/order/limit/offset` to a list sourced
/// from the Sync Engine's cache rather than the local store.
fn apply_local_shape(mut rows: Vec<Entity>, nq: &NamespaceQuery) -> Result<Vec<Entity>, StoreError> {
    if let Some(where_clause) = &nq.where_clause {
        rows.retain(|row| driftql::matches(row, where_clause));
    }
    if !nq.order_by.is_empty() {
        apply_order(&mut rows, &nq.order_by);
    }
    let offset = nq.offset.unwrap_or(0);
    rows = rows.into_iter().skip(offset).collect();
    if let Some(limit) = nq.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

async fn run_invalidator(inner: Arc<Inner>) {
    let mut rx = inner.store.changes();
    let mut dirty: HashSet<String> = HashSet::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Ok(change)) => {
                if let Some(ns) = inner.relevant_namespace(&change) {
                    dirty.insert(ns);
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                dirty.extend(inner.all_cached_namespaces());
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_elapsed) => {
                if !dirty.is_empty() {
                    inner.flush(&dirty);
                    dirty.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftbase_proto::{EntityId as Eid, Operation, Transaction, TxId};
    use serde_json::json;

    fn engine() -> QueryEngine { QueryEngine::new(Arc::new(TripleStore::open_temporary().unwrap()), None) }

    #[tokio::test]
    async fn query_returns_same_handle_for_equivalent_descriptions() {
        let engine = engine();
        let a = engine.query(json!({"todos": {"limit": 5}})).unwrap();
        let b = engine.query(json!({"todos": {"limit": 5}})).unwrap();
        assert_eq!(a.get().as_success().map(|r| r.len()), b.get().as_success().map(|r| r.len()));
    }

    #[tokio::test]
    async fn query_reflects_existing_local_data_immediately() {
        let store = Arc::new(TripleStore::open_temporary().unwrap());
        let id = Eid::new();
        let mut data = std::collections::BTreeMap::new();
        data.insert("text".to_string(), json!("a"));
        store
            .apply_transaction(&Transaction::new_pending(
                TxId::new(),
                vec![Operation::Add { namespace: "todos".to_string(), entity_id: id, data }],
                chrono::Utc::now(),
            ))
            .unwrap();

        let engine = QueryEngine::new(store, None);
        let handle = engine.query(json!({"todos": {}})).unwrap();
        let rows = handle.get().as_success().cloned().unwrap();
        assert_eq!(rows["todos"].len(), 1);
    }

    #[tokio::test]
    async fn invalidation_reruns_query_after_a_later_write() {
        let store = Arc::new(TripleStore::open_temporary().unwrap());
        let engine = QueryEngine::new(store.clone(), None);
        let handle = engine.query(json!({"todos": {}})).unwrap();
        assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 0);

        let id = Eid::new();
        let mut data = std::collections::BTreeMap::new();
        data.insert("text".to_string(), json!("a"));
        store
            .apply_transaction(&Transaction::new_pending(
                TxId::new(),
                vec![Operation::Add { namespace: "todos".to_string(), entity_id: id, data }],
                chrono::Utc::now(),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 1);
    }
}
