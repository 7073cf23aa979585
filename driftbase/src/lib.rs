//! Top-level facade: wires the Triple Store, Transaction Engine, Query
//! Engine, and Sync Engine together behind one constructible [`Db`].
//!
//! Grounded in the teacher's `ankurah-core::Node`: a single struct behind an
//! `Arc`, built once by a constructor that owns every subsystem, exposing a
//! small set of high-level methods that delegate to them. Unlike the
//! teacher's own facade crate (`ankurah`, a thin `pub use` re-export over
//! `ankurah-core`), this crate defines that aggregating struct itself,
//! since this spec has no wasm/uniffi/react surface to re-export around —
//! see DESIGN.md.

pub mod config;
pub mod error;

use std::{sync::Arc, time::Duration};

use driftbase_core::{AttributeRegistry, Observable, OpInput, QueryEngine, QueryResult, TransactionEngine, TripleStore};
use driftbase_proto::{Transaction, TransactionResult, TransactionStatus, Value};
use driftbase_sync::{ConnectionState, QueryResultCache, SyncEngine};
use tokio::sync::watch;
use tracing::warn;

pub use config::Config;
pub use driftbase_core as core;
pub use driftbase_proto as proto;
pub use error::DbError;

const RECENTLY_CREATED_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// The application's handle onto its local-first store (spec §1, §4).
pub struct Db {
    store: Arc<TripleStore>,
    #[allow(dead_code)]
    registry: Arc<AttributeRegistry>,
    transaction_engine: TransactionEngine,
    query_engine: Arc<QueryEngine>,
    sync_engine: Option<Arc<SyncEngine>>,
}

impl Db {
    /// Open (or create) the local store and, if `config.sync_enabled`,
    /// start the Sync Engine's connection loop in the background. Must be
    /// called from within a running Tokio runtime.
    pub fn open(config: Config) -> Result<Arc<Self>, DbError> {
        let store = Arc::new(match &config.persistence_dir {
            Some(dir) => TripleStore::open(dir)?,
            None => TripleStore::open_temporary()?,
        });
        let registry = Arc::new(AttributeRegistry::new());
        let transaction_engine = TransactionEngine::new(store.clone());

        let (query_engine, sync_engine) = if config.sync_enabled {
            let (cache, pending_queries) = QueryResultCache::new();
            let query_engine = Arc::new(QueryEngine::new(store.clone(), Some(cache.clone() as Arc<dyn driftbase_core::RemoteQueryCache>)));
            let sync_engine = SyncEngine::new(
                store.clone(),
                registry.clone(),
                cache.clone(),
                query_engine.clone(),
                pending_queries,
                config.app_id.clone(),
                config.base_url.clone(),
                config.reconnect_delay,
            );
            sync_engine.start();
            spawn_recently_created_sweep(cache);
            (query_engine, Some(sync_engine))
        } else {
            (Arc::new(QueryEngine::new(store.clone(), None)), None)
        };

        Ok(Arc::new(Self { store, registry, transaction_engine, query_engine, sync_engine }))
    }

    /// Apply a batch of operations locally and, if sync is enabled, hand
    /// the committed transaction to the Sync Engine for transmission (spec
    /// §4.2). Returns once the local write is durable; remote
    /// acknowledgement is observed later via the transaction's status.
    pub fn transact(&self, ops: Vec<OpInput>) -> Result<TransactionResult, DbError> {
        let result = self.transaction_engine.transact(ops)?;
        if result.status == TransactionStatus::Pending {
            if let Some(sync) = &self.sync_engine {
                match self.store.get_transaction(result.tx_id) {
                    Some(tx) => sync.notify_new_transaction(tx),
                    None => warn!(tx_id = %result.tx_id, "committed transaction vanished before sync hand-off"),
                }
            }
        }
        Ok(result)
    }

    /// Apply a transaction that already carries a remote `tx_id`, recorded
    /// directly as `synced` (spec §3.3). Exposed for callers embedding their
    /// own transport rather than the bundled Sync Engine.
    pub fn apply_remote(&self, tx: Transaction) -> Result<(), DbError> {
        self.store.apply_transaction(&tx).map_err(DbError::from)
    }

    /// Run (or attach to an already-running) a declarative query (spec
    /// §4.3). The returned handle observes every subsequent invalidation.
    pub fn query(&self, description: Value) -> Result<Observable<QueryResult>, DbError> {
        Ok(self.query_engine.query(description)?)
    }

    /// Join a presence/broadcast room (spec §4.4.6). A no-op if sync is
    /// disabled.
    pub async fn join_room(&self, room_type: &str, room_id: &str) {
        if let Some(sync) = &self.sync_engine {
            sync.join_room(room_type, room_id).await;
        }
    }

    pub async fn leave_room(&self, room_type: &str, room_id: &str) {
        if let Some(sync) = &self.sync_engine {
            sync.leave_room(room_type, room_id).await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sync_engine.as_ref().map(|s| s.is_connected()).unwrap_or(false)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.sync_engine.as_ref().map(|s| s.state()).unwrap_or(ConnectionState::Disconnected)
    }

    /// `None` when sync is disabled — there is no state to watch.
    pub fn connection_state_changes(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.sync_engine.as_ref().map(|s| s.state_changes())
    }

    pub fn shutdown(&self) {
        if let Some(sync) = &self.sync_engine {
            sync.stop();
        }
    }

    /// Wipe the local store (Triple Store `clear_all`). Leaves the Sync
    /// Engine running; a reconnect re-derives nothing, since there is
    /// nothing pending left to send.
    pub fn clear_all(&self) -> Result<(), DbError> {
        self.store.clear_all().map_err(DbError::from)
    }
}

/// Install a `tracing-subscriber` formatter at a level driven by
/// `verbose_logging` (spec §6.3, Design Notes §9). A convenience only: the
/// library itself never installs a global subscriber on its own, so
/// applications embedding their own logging setup can skip this entirely.
pub fn init_tracing(verbose_logging: bool) {
    let filter = if verbose_logging { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter)).init();
}

fn spawn_recently_created_sweep(cache: Arc<QueryResultCache>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECENTLY_CREATED_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            cache.evict_stale_recently_created();
        }
    });
}
