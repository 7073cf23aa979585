//! The Sync Engine (spec §4.4): session lifecycle, outbound wire translation,
//! inbound op dispatch, and room/query subscription bookkeeping.
//!
//! Grounded in the teacher's `connectors/websocket-client/src/client.rs`:
//! the same `Inner`-behind-an-`Arc` shape, the same `run_connection_loop` /
//! `connect_once` split, the same `Notify`-based shutdown and
//! doubling-backoff reconnect. Unlike the teacher, a single connection loop
//! both sends and receives (no separate peer-sender actor), because this
//! protocol is client/server rather than peer-to-peer.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use driftbase_core::{AttributeRegistry, QueryEngine, TripleStore};
use driftbase_proto::{ClientEventId, ClientMessage, EntityId, ServerMessage, SessionId, Transaction, TxId, Value};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    select,
    sync::{mpsc, watch, Mutex, Notify},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    cache::{PendingQuery, QueryResultCache},
    error::SyncError,
    wire,
};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SENT_EVENT_IDS_LIMIT: usize = 1000;
const ROOM_JOIN_PACING: Duration = Duration::from_millis(10);
const TRANSACT_PACING: Duration = Duration::from_millis(10);

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Session states (spec §4.4.1): `disconnected → connecting →
/// awaiting-init-ok → connected → (reconnecting | disconnected)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingInitOk,
    Connected,
    Reconnecting,
}

/// Seam for a future presence collaborator (Design Notes §9): the Sync
/// Engine tracks `joined_rooms`/`active_rooms` and parses inbound presence
/// frames, but never interprets a payload itself. With no sink attached,
/// presence frames are observed and dropped.
pub trait PresenceSink: Send + Sync {
    fn on_presence(&self, kind: PresenceKind, payload: Value);
}

/// Distinguishes the three presence frames the protocol defines (spec
/// §4.4.6), since all three carry the same `payload: Value` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Presence,
    Refresh,
    SetOk,
}

/// A locally originated frame waiting for a live socket to carry it. Nothing
/// here needs to survive a dropped connection: pending transactions are
/// always re-derived from the store's durable log, and live queries from the
/// cache's subscribed-keys set, at every `init-ok` (see `on_init_ok`).
enum Outbound {
    Transact(Transaction),
    JoinRoom(String, String),
    LeaveRoom(String, String),
}

struct Inner {
    store: Arc<TripleStore>,
    registry: Arc<AttributeRegistry>,
    cache: Arc<QueryResultCache>,
    query_engine: Arc<QueryEngine>,
    ws_url: String,
    app_id: String,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    session_id: Mutex<Option<SessionId>>,
    sent_event_ids: Mutex<HashSet<ClientEventId>>,
    joined_rooms: Mutex<HashSet<(String, String)>>,
    active_rooms: Mutex<HashSet<(String, String)>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: Notify,
    shutdown_requested: AtomicBool,
    presence_sink: StdMutex<Option<Arc<dyn PresenceSink>>>,
}

/// Owns the WebSocket connection to the server and keeps local and remote
/// state converging (spec §4.4 "Responsibility").
pub struct SyncEngine {
    inner: Arc<Inner>,
    receivers: StdMutex<Option<(mpsc::UnboundedReceiver<Outbound>, mpsc::UnboundedReceiver<PendingQuery>)>>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<TripleStore>,
        registry: Arc<AttributeRegistry>,
        cache: Arc<QueryResultCache>,
        query_engine: Arc<QueryEngine>,
        pending_queries: mpsc::UnboundedReceiver<PendingQuery>,
        app_id: String,
        base_url: String,
        reconnect_delay: Duration,
    ) -> Arc<Self> {
        let ws_url = derive_ws_url(&base_url, &app_id);
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            store,
            registry,
            cache,
            query_engine,
            ws_url,
            app_id,
            reconnect_delay,
            state: state_tx,
            session_id: Mutex::new(None),
            sent_event_ids: Mutex::new(HashSet::new()),
            joined_rooms: Mutex::new(HashSet::new()),
            active_rooms: Mutex::new(HashSet::new()),
            outbound: outbound_tx,
            shutdown: Notify::new(),
            shutdown_requested: AtomicBool::new(false),
            presence_sink: StdMutex::new(None),
        });

        Arc::new(Self { inner, receivers: StdMutex::new(Some((outbound_rx, pending_queries))) })
    }

    /// Start the connection loop (spec §4.4.1 `start`). A no-op if already started.
    pub fn start(self: &Arc<Self>) {
        let Some((outbound_rx, pending_queries)) = self.receivers.lock().unwrap().take() else { return };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_connection_loop(inner, outbound_rx, pending_queries));
    }

    pub fn state(&self) -> ConnectionState { *self.inner.state.borrow() }

    pub fn is_connected(&self) -> bool { self.state() == ConnectionState::Connected }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> { self.inner.state.subscribe() }

    /// `stop()` (spec §5): cancels the reconnect timer, closes the socket,
    /// and transitions `connected` to false. Transactions already applied
    /// locally remain pending in the durable log for the next `start()`.
    pub fn stop(&self) {
        self.inner.shutdown_requested.store(true, Ordering::Release);
        self.inner.shutdown.notify_waiters();
    }

    /// Enqueue a freshly committed local transaction for transmission (spec
    /// §4.4.2). Also drops the query-result cache entry for its namespace,
    /// since a local write makes any cached remote snapshot stale.
    pub fn notify_new_transaction(&self, tx: Transaction) {
        let namespace = wire::outbound_namespace(&tx);
        self.inner.cache.invalidate_collection(&namespace);
        let _ = self.inner.outbound.send(Outbound::Transact(tx));
    }

    /// `send_join_room` (spec §4.4.6): adds to `active_rooms` so reconnects
    /// rejoin it, and asks the live connection to send it now.
    pub async fn join_room(&self, room_type: &str, room_id: &str) {
        self.inner.active_rooms.lock().await.insert((room_type.to_string(), room_id.to_string()));
        let _ = self.inner.outbound.send(Outbound::JoinRoom(room_type.to_string(), room_id.to_string()));
    }

    pub async fn leave_room(&self, room_type: &str, room_id: &str) {
        self.inner.active_rooms.lock().await.remove(&(room_type.to_string(), room_id.to_string()));
        let _ = self.inner.outbound.send(Outbound::LeaveRoom(room_type.to_string(), room_id.to_string()));
    }

    /// Attach a presence collaborator. A setter rather than a constructor
    /// argument, since most callers run with none attached at all.
    pub fn set_presence_sink(&self, sink: Arc<dyn PresenceSink>) {
        *self.inner.presence_sink.lock().unwrap() = Some(sink);
    }
}

/// Doubles the reconnect delay, capped at `max` (spec §4.4.1, P8). A
/// reconnect after a failed attempt never waits less than the previous
/// attempt, and never exceeds `max` regardless of how many attempts fail.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

fn derive_ws_url(base_url: &str, app_id: &str) -> String {
    let ws_base = match base_url {
        u if u.starts_with("wss://") || u.starts_with("ws://") => u.to_string(),
        u if u.starts_with("https://") => format!("wss://{}", &u[8..]),
        u if u.starts_with("http://") => format!("ws://{}", &u[7..]),
        u => format!("wss://{u}"),
    };
    format!("{}/runtime/session?app_id={}", ws_base.trim_end_matches('/'), app_id)
}

/// Main connection loop with automatic reconnection, mirroring the teacher's
/// `run_connection_loop` (doubling backoff capped at `MAX_BACKOFF`,
/// `Notify`-gated shutdown checked both while connected and while backing off).
async fn run_connection_loop(inner: Arc<Inner>, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>, mut pending_queries: mpsc::UnboundedReceiver<PendingQuery>) {
    let mut backoff = inner.reconnect_delay;
    info!(url = %inner.ws_url, "starting sync connection loop");

    loop {
        select! {
            _ = inner.shutdown.notified() => {
                info!("sync connection loop shutting down");
                break;
            }
            result = connect_once(&inner, &mut outbound_rx, &mut pending_queries) => {
                match result {
                    Ok(()) => {
                        backoff = inner.reconnect_delay;
                        if inner.shutdown_requested.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "sync connection failed");
                        inner.state.send_replace(ConnectionState::Reconnecting);
                        select! {
                            _ = inner.shutdown.notified() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = next_backoff(backoff, MAX_BACKOFF);
                    }
                }
            }
        }
    }

    inner.state.send_replace(ConnectionState::Disconnected);
}

async fn connect_once(inner: &Arc<Inner>, outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>, pending_queries: &mut mpsc::UnboundedReceiver<PendingQuery>) -> Result<(), SyncError> {
    inner.state.send_replace(ConnectionState::Connecting);
    let (ws_stream, _) = connect_async(inner.ws_url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    inner.state.send_replace(ConnectionState::AwaitingInitOk);
    let init_msg = ClientMessage::Init {
        app_id: inner.app_id.clone(),
        refresh_token: None,
        client_event_id: ClientEventId::new(),
        versions: serde_json::json!({ "client": "driftbase-sync", "version": env!("CARGO_PKG_VERSION") }),
    };
    send(&mut sink, &init_msg).await?;

    let mut initialized = false;

    loop {
        select! {
            _ = inner.shutdown.notified() => break,
            outbound = outbound_rx.recv(), if initialized => {
                match outbound {
                    Some(msg) => handle_outbound(inner, &mut sink, msg).await?,
                    None => break,
                }
            }
            pending = pending_queries.recv(), if initialized => {
                match pending {
                    Some(pq) => send_add_query(inner, &mut sink, &pq.description).await?,
                    None => break,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let server_msg = ServerMessage::parse(text.as_str()).unwrap_or_else(|e| {
                            warn!(error = %e, "server frame was not valid JSON");
                            ServerMessage::Unknown { op: None, payload: Value::Null }
                        });
                        if handle_inbound(inner, &mut sink, server_msg).await? {
                            initialized = true;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("server closed the sync connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    Ok(())
}

async fn send(sink: &mut WsSink, msg: &ClientMessage) -> Result<(), SyncError> {
    let text = serde_json::to_string(msg).map_err(|e| SyncError::Malformed(e.to_string()))?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn record_sent_event_id(inner: &Arc<Inner>, id: ClientEventId) {
    let mut set = inner.sent_event_ids.lock().await;
    set.insert(id);
    if set.len() > SENT_EVENT_IDS_LIMIT {
        set.clear();
    }
}

/// Wrap and transmit a transaction (spec §4.4.2). The `tx_id` doubles as the
/// wire's `client-event-id`, which is how an echoed remote `transact` is
/// later recognised as our own.
async fn send_transact(inner: &Arc<Inner>, sink: &mut WsSink, tx: &Transaction) -> Result<(), SyncError> {
    let tx_steps = wire::translate_outbound(tx, &inner.registry);
    let client_event_id = ClientEventId::from_uuid(tx.tx_id.0);
    let msg = ClientMessage::Transact { tx_steps, created: tx.created_at.timestamp_millis(), order: 1, client_event_id };
    send(sink, &msg).await?;
    record_sent_event_id(inner, client_event_id).await;
    for op in &tx.operations {
        inner.cache.mark_recently_created(op.entity_id());
    }
    Ok(())
}

async fn send_add_query(inner: &Arc<Inner>, sink: &mut WsSink, description: &Value) -> Result<(), SyncError> {
    let session_id = match inner.session_id.lock().await.clone() {
        Some(id) => id,
        None => return Ok(()), // not yet initialized; will be re-sent from `subscribed_keys` on `init-ok`
    };
    let msg = ClientMessage::AddQuery { q: description.clone(), client_event_id: ClientEventId::new(), session_id, subscribe: true };
    send(sink, &msg).await
}

async fn send_join_room(sink: &mut WsSink, room_type: &str, room_id: &str) -> Result<(), SyncError> {
    let msg = ClientMessage::JoinRoom { room_type: room_type.to_string(), room_id: room_id.to_string(), client_event_id: ClientEventId::new() };
    send(sink, &msg).await
}

async fn send_leave_room(sink: &mut WsSink, room_type: &str, room_id: &str) -> Result<(), SyncError> {
    let msg = ClientMessage::LeaveRoom { room_type: room_type.to_string(), room_id: room_id.to_string(), client_event_id: ClientEventId::new() };
    send(sink, &msg).await
}

async fn handle_outbound(inner: &Arc<Inner>, sink: &mut WsSink, msg: Outbound) -> Result<(), SyncError> {
    match msg {
        Outbound::Transact(tx) => send_transact(inner, sink, &tx).await,
        Outbound::JoinRoom(room_type, room_id) => send_join_room(sink, &room_type, &room_id).await,
        Outbound::LeaveRoom(room_type, room_id) => send_leave_room(sink, &room_type, &room_id).await,
    }
}

/// Dispatch one inbound frame (spec §4.4.3). Returns `true` exactly once,
/// when `init-ok` completes session setup and the connection becomes usable
/// for outbound traffic.
async fn handle_inbound(inner: &Arc<Inner>, sink: &mut WsSink, msg: ServerMessage) -> Result<bool, SyncError> {
    match msg {
        ServerMessage::InitOk { session_id, attrs } => {
            *inner.session_id.lock().await = Some(session_id);
            for descriptor in &attrs {
                inner.registry.register(descriptor);
            }
            info!(attrs = attrs.len(), "sync session initialized");

            for (_cache_key, description) in inner.cache.subscribed_keys() {
                send_add_query(inner, sink, &description).await?;
            }

            let rooms: Vec<(String, String)> = inner.active_rooms.lock().await.iter().cloned().collect();
            for (room_type, room_id) in rooms {
                send_join_room(sink, &room_type, &room_id).await?;
                tokio::time::sleep(ROOM_JOIN_PACING).await;
            }

            for tx in inner.store.get_pending_transactions() {
                send_transact(inner, sink, &tx).await?;
                tokio::time::sleep(TRANSACT_PACING).await;
            }

            inner.state.send_replace(ConnectionState::Connected);
            Ok(true)
        }
        ServerMessage::InitError { error } => {
            warn!(%error, "server rejected init");
            inner.state.send_replace(ConnectionState::Disconnected);
            Ok(false)
        }
        ServerMessage::Transact { client_event_id, tx_steps } => {
            if let Some(ceid) = client_event_id {
                if inner.sent_event_ids.lock().await.contains(&ceid) {
                    debug!(%ceid, "dropping echoed transaction");
                    return Ok(false);
                }
            }
            let operations = wire::apply_inbound_tx_steps(tx_steps, &inner.registry);
            if !operations.is_empty() {
                let tx_id = client_event_id.map(|c| TxId::from_uuid(c.0)).unwrap_or_default();
                let tx = Transaction::new_synced(tx_id, operations, chrono::Utc::now());
                if let Err(e) = inner.store.apply_transaction(&tx) {
                    warn!(error = %e, "failed to apply remote transaction");
                }
            }
            Ok(false)
        }
        ServerMessage::LegacyTransaction(tx) => {
            if let Err(e) = inner.store.apply_transaction(&tx) {
                warn!(error = %e, tx_id = %tx.tx_id, "failed to apply legacy transaction");
            }
            Ok(false)
        }
        ServerMessage::TransactOk { client_event_id } => {
            mark_synced(inner, TxId::from_uuid(client_event_id.0));
            Ok(false)
        }
        ServerMessage::TransactionAck { tx_id } => {
            mark_synced(inner, tx_id);
            Ok(false)
        }
        ServerMessage::Refresh { data } => {
            match data {
                Some(payload) => process_query_response(inner, &payload, "refresh-query", None),
                None => inner.query_engine.invalidate_all(),
            }
            Ok(false)
        }
        ServerMessage::RefreshOk { computations } => {
            for computation in &computations {
                if let Some(result) = computation.get("instaql-result") {
                    process_query_response(inner, result, "refresh-ok", None);
                }
            }
            Ok(false)
        }
        ServerMessage::QueryResponse { data, .. } => {
            process_query_response(inner, &data, "collection-data", None);
            Ok(false)
        }
        ServerMessage::JoinRoomOk { room_type, room_id } => {
            inner.joined_rooms.lock().await.insert((room_type, room_id));
            Ok(false)
        }
        ServerMessage::LeaveRoomOk { room_type, room_id } => {
            inner.joined_rooms.lock().await.remove(&(room_type, room_id));
            Ok(false)
        }
        ServerMessage::Presence { payload } => {
            dispatch_presence(inner, PresenceKind::Presence, payload);
            Ok(false)
        }
        ServerMessage::RefreshPresence { payload } => {
            dispatch_presence(inner, PresenceKind::Refresh, payload);
            Ok(false)
        }
        ServerMessage::SetPresenceOk { payload } => {
            dispatch_presence(inner, PresenceKind::SetOk, payload);
            Ok(false)
        }
        ServerMessage::Error { message } => {
            warn!(%message, "server reported an error");
            Ok(false)
        }
        ServerMessage::Unknown { op, payload } => {
            warn!(?op, %payload, "unrecognized server message");
            Ok(false)
        }
    }
}

fn dispatch_presence(inner: &Arc<Inner>, kind: PresenceKind, payload: Value) {
    match inner.presence_sink.lock().unwrap().as_ref() {
        Some(sink) => sink.on_presence(kind, payload),
        None => debug!(?kind, "presence frame received; no presence collaborator is configured"),
    }
}

fn mark_synced(inner: &Arc<Inner>, tx_id: TxId) {
    if let Err(e) = inner.store.mark_transaction_synced(tx_id) {
        warn!(%tx_id, error = %e, "failed to mark transaction synced");
    }
}

/// Decode, dedupe, cache, and converge a query-response payload (spec
/// §4.4.4). `channel` scopes the duplicate-suppression hash — `refresh-ok`
/// and plain collection data are tracked independently.
fn process_query_response(inner: &Arc<Inner>, payload: &Value, channel: &'static str, fallback_namespace: Option<&str>) {
    if inner.cache.is_duplicate(channel, payload) {
        return;
    }
    let decoded = wire::decode_query_response(payload, &inner.registry, fallback_namespace);
    for (namespace, entities) in decoded {
        inner.cache.store_collection(&namespace, entities.clone());

        let local_ids: Vec<EntityId> = inner
            .store
            .query_entities(&namespace, None, None, None, None, None, &[])
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.get("id").and_then(Value::as_str).and_then(|s| EntityId::parse(s).ok()))
            .collect();

        let ops = wire::differential_operations(&namespace, &entities, &local_ids, |id| inner.cache.is_recently_created(id));
        if ops.is_empty() {
            continue;
        }
        let tx = Transaction::new_synced(TxId::new(), ops, chrono::Utc::now());
        if let Err(e) = inner.store.apply_transaction(&tx) {
            warn!(error = %e, namespace, "failed to apply differential convergence transaction");
        }
    }
}
