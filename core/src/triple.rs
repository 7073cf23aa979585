use driftbase_proto::{AttrName, EntityId, TxId, Value};
use serde::{Deserialize, Serialize};

/// The durable unit of storage (spec §3.1, §6.2): `(entity_id, attribute_name,
/// value, tx_provenance, created_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub entity_id: EntityId,
    pub attribute: AttrName,
    pub value: Value,
    pub tx_provenance: TxId,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// Emitted once per triple effect after a transaction commits (spec §4.1).
#[derive(Debug, Clone)]
pub struct TripleChange {
    pub kind: ChangeKind,
    pub triple: Triple,
}
