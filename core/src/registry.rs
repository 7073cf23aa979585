//! Bidirectional `(namespace, attr_name) <-> attr_id` mapping (spec §3.1,
//! §4.4.1). Grown on session `init-ok` and on remote `add-attr` steps;
//! append-only for the lifetime of a session (invariant 2, P7).

use dashmap::DashMap;
use driftbase_proto::{AttrDescriptor, AttrId, AttrName, Namespace};
use tracing::warn;

#[derive(Debug, Default)]
pub struct AttributeRegistry {
    by_name: DashMap<(Namespace, AttrName), AttrId>,
    by_id: DashMap<AttrId, (Namespace, AttrName)>,
}

impl AttributeRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register a descriptor received from the server. If `id` is already
    /// known and maps to a *different* `(namespace, name)`, the existing
    /// mapping wins and a warning is logged — ids are never remapped
    /// (invariant 2).
    pub fn register(&self, descriptor: &AttrDescriptor) {
        let key = (descriptor.namespace().to_string(), descriptor.attr_name().to_string());
        if let Some(existing) = self.by_id.get(&descriptor.id) {
            if *existing != key {
                warn!(attr_id = %descriptor.id, existing = ?*existing, incoming = ?key, "ignoring attempt to remap an existing attribute id");
            }
            return;
        }
        self.by_id.insert(descriptor.id, key.clone());
        self.by_name.insert(key, descriptor.id);
    }

    pub fn resolve_id(&self, namespace: &str, attr_name: &str) -> Option<AttrId> {
        self.by_name.get(&(namespace.to_string(), attr_name.to_string())).map(|e| *e)
    }

    pub fn resolve_name(&self, attr_id: AttrId) -> Option<(Namespace, AttrName)> { self.by_id.get(&attr_id).map(|e| e.clone()) }

    pub fn len(&self) -> usize { self.by_id.len() }

    pub fn is_empty(&self) -> bool { self.by_id.is_empty() }
}
