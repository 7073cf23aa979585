//! Local storage and reactivity: the Triple Store, Transaction Engine, and
//! Query Engine (spec §4.1–§4.3). The Sync Engine lives in `driftbase-sync`
//! and talks to this crate only through [`query_engine::RemoteQueryCache`].

pub mod error;
pub mod observable;
pub mod query_engine;
pub mod registry;
pub mod store;
pub mod transaction_engine;
pub mod triple;

pub use error::{StoreError, TransactError, ValidationError};
pub use observable::{Observable, ObservableWriter, QueryState};
pub use query_engine::{QueryEngine, QueryResult, RemoteQueryCache};
pub use registry::AttributeRegistry;
pub use store::{Entity, TripleStore};
pub use transaction_engine::{OpInput, TransactionEngine};
pub use triple::{ChangeKind, Triple, TripleChange};
