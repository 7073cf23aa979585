//! The Sync Engine's query-result cache (spec §4.3 synchronous fast-path,
//! §4.4.4 query-result cache / duplicate suppression / recently-created
//! tracking).

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use driftbase_core::{Entity, RemoteQueryCache};
use driftbase_proto::{EntityId, Namespace, Value};
use tokio::sync::mpsc;

const RECENTLY_CREATED_WINDOW: Duration = Duration::from_secs(10);
const RECENTLY_CREATED_EVICTION_AGE: Duration = Duration::from_secs(30);

/// A pending `add-query` intent the running connection loop should transmit
/// (or queue, if not yet connected).
pub struct PendingQuery {
    pub cache_key: String,
    pub description: Value,
}

pub struct QueryResultCache {
    collections: DashMap<Namespace, Vec<Entity>>,
    subscribed: DashMap<String, Value>,
    last_hash: DashMap<&'static str, u64>,
    recently_created: DashMap<EntityId, Instant>,
    outbound: mpsc::UnboundedSender<PendingQuery>,
}

impl QueryResultCache {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<PendingQuery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            std::sync::Arc::new(Self {
                collections: DashMap::new(),
                subscribed: DashMap::new(),
                last_hash: DashMap::new(),
                recently_created: DashMap::new(),
                outbound: tx,
            }),
            rx,
        )
    }

    /// Record the decoded collection for a namespace (spec §4.4.4 "query-result cache").
    pub fn store_collection(&self, namespace: &str, entities: Vec<Entity>) { self.collections.insert(namespace.to_string(), entities); }

    /// Cleared whenever a local outbound transaction touches `namespace`
    /// (spec §4.4.4): the cached remote snapshot is now stale.
    pub fn invalidate_collection(&self, namespace: &str) { self.collections.remove(namespace); }

    /// Single-slot duplicate suppression per channel (spec §4.4.4). Returns
    /// `true` if `payload` is a repeat of the last payload seen on `channel`.
    pub fn is_duplicate(&self, channel: &'static str, payload: &Value) -> bool {
        let mut hasher = DefaultHasher::new();
        payload.to_string().hash(&mut hasher);
        let hash = hasher.finish();
        let is_dup = self.last_hash.get(channel).map(|h| *h == hash).unwrap_or(false);
        self.last_hash.insert(channel, hash);
        is_dup
    }

    pub fn mark_recently_created(&self, entity_id: EntityId) { self.recently_created.insert(entity_id, Instant::now()); }

    pub fn is_recently_created(&self, entity_id: &EntityId) -> bool {
        self.recently_created.get(entity_id).map(|at| at.elapsed() < RECENTLY_CREATED_WINDOW).unwrap_or(false)
    }

    /// Periodic sweep (spec §4.4.4 "entities older than 30 seconds are periodically evicted").
    pub fn evict_stale_recently_created(&self) { self.recently_created.retain(|_, at| at.elapsed() < RECENTLY_CREATED_EVICTION_AGE); }

    pub fn subscribed_keys(&self) -> Vec<(String, Value)> { self.subscribed.iter().map(|e| (e.key().clone(), e.value().clone())).collect() }
}

impl RemoteQueryCache for QueryResultCache {
    fn cached_collection(&self, namespace: &str) -> Option<Vec<Entity>> { self.collections.get(namespace).map(|e| e.clone()) }

    fn subscribe_query(&self, cache_key: &str, description: &Value) {
        if self.subscribed.contains_key(cache_key) {
            return;
        }
        self.subscribed.insert(cache_key.to_string(), description.clone());
        let _ = self.outbound.send(PendingQuery { cache_key: cache_key.to_string(), description: description.clone() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_then_invalidate_collection_round_trips() {
        let (cache, _rx) = QueryResultCache::new();
        cache.store_collection("todos", vec![]);
        assert!(cache.cached_collection("todos").is_some());
        cache.invalidate_collection("todos");
        assert!(cache.cached_collection("todos").is_none());
    }

    #[test]
    fn is_duplicate_suppresses_a_repeated_payload_on_the_same_channel() {
        let (cache, _rx) = QueryResultCache::new();
        let payload = json!({"todos": []});
        assert!(!cache.is_duplicate("refresh-query", &payload));
        assert!(cache.is_duplicate("refresh-query", &payload));
        assert!(!cache.is_duplicate("refresh-query", &json!({"todos": [1]})));
    }

    #[test]
    fn is_duplicate_tracks_channels_independently() {
        let (cache, _rx) = QueryResultCache::new();
        let payload = json!({"todos": []});
        assert!(!cache.is_duplicate("refresh-query", &payload));
        assert!(!cache.is_duplicate("refresh-ok", &payload));
    }

    #[test]
    fn recently_created_is_true_until_the_window_elapses() {
        let (cache, _rx) = QueryResultCache::new();
        let id = EntityId::new();
        assert!(!cache.is_recently_created(&id));
        cache.mark_recently_created(id);
        assert!(cache.is_recently_created(&id));
    }

    #[test]
    fn evict_stale_recently_created_leaves_fresh_entries_alone() {
        let (cache, _rx) = QueryResultCache::new();
        let id = EntityId::new();
        cache.mark_recently_created(id);
        cache.evict_stale_recently_created();
        assert!(cache.is_recently_created(&id));
    }

    /// Reconnect idempotence (P8): re-subscribing to a query already tracked
    /// under the same cache key must not re-enqueue a second `add-query`
    /// intent, since `init-ok` replays `subscribed_keys()` on every reconnect.
    #[test]
    fn subscribe_query_is_idempotent_for_a_repeated_cache_key() {
        let (cache, mut rx) = QueryResultCache::new();
        let description = json!({"todos": {}});
        cache.subscribe_query("todos:{}", &description);
        cache.subscribe_query("todos:{}", &description);

        assert_eq!(cache.subscribed_keys().len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribe_query_tracks_distinct_cache_keys_separately() {
        let (cache, mut rx) = QueryResultCache::new();
        cache.subscribe_query("todos:{}", &json!({"todos": {}}));
        cache.subscribe_query("posts:{}", &json!({"posts": {}}));

        assert_eq!(cache.subscribed_keys().len(), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
