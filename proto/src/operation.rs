use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    id::EntityId,
    value::{AttrName, Namespace, Value},
};

/// One entry of an operation batch (spec §3.1). Expanded to one or more
/// triple-level effects at apply time by the Triple Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    Add { namespace: Namespace, entity_id: EntityId, data: BTreeMap<AttrName, Value> },
    Update { namespace: Namespace, entity_id: EntityId, data: BTreeMap<AttrName, Value> },
    /// `namespace` is captured by the caller before the delete is applied
    /// locally (the store no longer has anything to tell us afterward —
    /// `__type` is gone along with the rest of the entity's triples).
    /// `None` only for a delete of an id the store never had in the first
    /// place.
    Delete { entity_id: EntityId, namespace: Option<Namespace> },
}

impl Operation {
    pub fn entity_id(&self) -> EntityId {
        match self {
            Operation::Add { entity_id, .. } | Operation::Update { entity_id, .. } | Operation::Delete { entity_id, .. } => *entity_id,
        }
    }

    /// Best-effort namespace hint carried by the operation itself, independent
    /// of anything the store knows.
    pub fn namespace_hint(&self) -> Option<&str> {
        match self {
            Operation::Add { namespace, .. } | Operation::Update { namespace, .. } => Some(namespace.as_str()),
            Operation::Delete { namespace, .. } => namespace.as_deref(),
        }
    }
}
