/// A triple's value: a JSON scalar or small JSON structure, stored verbatim (spec §3.1).
pub type Value = serde_json::Value;

/// Short identifier scoped to a namespace, e.g. `"text"`, `"completed"`.
pub type AttrName = String;

/// Entity-type / collection name, e.g. `"todos"`.
pub type Namespace = String;

/// Reserved attribute that records an entity's namespace (spec §3.1, invariant 1).
pub const TYPE_ATTR: &str = "__type";

/// Reserved entity id used by the synthetic invalidation transaction (spec §4.3).
/// Never surfaced to applications; skipped by the Query Engine's invalidator.
pub const INVALIDATION_SENTINEL_ENTITY: &str = "__query_invalidation";

/// Historical default namespace fallback (spec §4.4.2, §4.4.4). Preserved
/// deliberately; see DESIGN.md.
pub const DEFAULT_NAMESPACE: &str = "todos";

/// Placeholder namespace used by legacy call sites that don't know an
/// entity's type at the point of calling `delete`/`update` (spec §9, Open
/// Questions). Resolved at the store/sync boundary.
pub const UNKNOWN_NAMESPACE: &str = "unknown";
