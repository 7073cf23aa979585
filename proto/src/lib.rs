pub mod attr;
pub mod error;
pub mod id;
pub mod message;
pub mod operation;
pub mod transaction;
pub mod value;

pub use attr::AttrDescriptor;
pub use error::DecodeError;
pub use id::{AttrId, ClientEventId, EntityId, SessionId, TxId};
pub use message::{ClientMessage, ServerMessage, TxStep};
pub use operation::Operation;
pub use transaction::{Transaction, TransactionResult, TransactionStatus};
pub use value::{AttrName, Namespace, Value};
