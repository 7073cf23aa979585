//! The Sync Engine crate (spec §4.4): WebSocket session lifecycle, wire
//! translation, and the query-result cache that backs the Query Engine's
//! synchronous fast path (spec §4.3).

pub mod cache;
pub mod error;
pub mod session;
pub mod wire;

pub use cache::{PendingQuery, QueryResultCache};
pub use error::SyncError;
pub use session::{ConnectionState, PresenceKind, PresenceSink, SyncEngine};
