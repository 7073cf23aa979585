//! Translation between local [`Transaction`]/[`Operation`] values and the
//! wire's `tx-steps` arrays, and decoding of inbound query-response payloads
//! (spec §4.4.2, §4.4.4).

use std::collections::{BTreeMap, HashSet};

use driftbase_core::{AttributeRegistry, Entity};
use driftbase_proto::{
    value::{DEFAULT_NAMESPACE, TYPE_ATTR},
    AttrId, AttrName, EntityId, Namespace, Operation, Transaction, TxStep, Value,
};
use tracing::warn;

/// Namespace used to label an outbound transaction on the wire (spec §4.4.2
/// step 1): the first operation that carries one, else the historical
/// default.
pub fn outbound_namespace(tx: &Transaction) -> Namespace {
    tx.operations.iter().find_map(|op| op.namespace_hint().map(str::to_string)).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

/// Translate a local transaction into the `tx-steps` the wire format expects
/// (spec §4.4.2). Fields whose attribute isn't yet registered are skipped
/// with a warning rather than inventing an id.
pub fn translate_outbound(tx: &Transaction, registry: &AttributeRegistry) -> Vec<TxStep> {
    let namespace = outbound_namespace(tx);
    let mut steps = Vec::new();

    for op in &tx.operations {
        match op {
            Operation::Add { namespace: op_ns, entity_id, data } | Operation::Update { namespace: op_ns, entity_id, data } => {
                for (attr, value) in data {
                    if attr == TYPE_ATTR {
                        continue;
                    }
                    match registry.resolve_id(op_ns, attr) {
                        Some(attr_id) => steps.push(TxStep::AddTriple { entity_id: *entity_id, attr_id, value: value.clone() }),
                        None => warn!(namespace = %op_ns, attr, "skipping field: attribute not yet registered by server"),
                    }
                }
            }
            Operation::Delete { entity_id, namespace: op_ns } => {
                let resolved_namespace = op_ns.clone().unwrap_or_else(|| namespace.clone());
                steps.push(TxStep::DeleteEntity { entity_id: *entity_id, namespace: resolved_namespace });
            }
        }
    }
    steps
}

fn entity_id_of(entity: &Entity) -> Option<EntityId> { entity.get("id").and_then(Value::as_str).and_then(|s| EntityId::parse(s).ok()) }

/// Decode an inbound query-response payload into per-namespace entity lists
/// (spec §4.4.4). Tries the datalog shape first, falls back to a plain
/// collection shape.
pub fn decode_query_response(payload: &Value, registry: &AttributeRegistry, fallback_namespace: Option<&str>) -> BTreeMap<Namespace, Vec<Entity>> {
    if let Some(join_rows) = find_join_rows(payload) {
        return decode_datalog(join_rows, registry, fallback_namespace);
    }
    decode_collection_shape(payload)
}

const PROTOCOL_KEYS: &[&str] = &["op", "client-event-id", "session-id", "q", "datalog-result", "datalog"];

fn find_join_rows(payload: &Value) -> Option<&Vec<Value>> {
    let candidates = [
        payload.get("datalog-result"),
        payload.get("datalog"),
        payload.get("result").and_then(|r| r.get("datalog-result")),
        payload.get("data").and_then(|d| d.get("datalog-result")),
    ];
    candidates.into_iter().flatten().find_map(|v| v.get("join-rows")).and_then(Value::as_array)
}

/// `join-rows` may be `[[id, attr, val], …]` or nested one level deeper,
/// `[[[id, attr, val], …]]` (spec §4.4.4 step 2).
fn unwrap_join_rows(join_rows: &[Value]) -> Vec<&Value> {
    let nested = join_rows.first().and_then(Value::as_array).and_then(|inner| inner.first()).map(Value::is_array).unwrap_or(false);
    if nested {
        join_rows.iter().filter_map(Value::as_array).flatten().collect()
    } else {
        join_rows.iter().collect()
    }
}

fn decode_datalog(join_rows: &[Value], registry: &AttributeRegistry, fallback_namespace: Option<&str>) -> BTreeMap<Namespace, Vec<Entity>> {
    let mut by_entity: BTreeMap<EntityId, Entity> = BTreeMap::new();

    for row in unwrap_join_rows(join_rows) {
        let Some(row) = row.as_array() else { continue };
        let (Some(entity_id_str), Some(attr_id_str), Some(value)) = (row.first().and_then(Value::as_str), row.get(1).and_then(Value::as_str), row.get(2))
        else {
            warn!(?row, "skipping malformed datalog join-row");
            continue;
        };
        let Ok(entity_id) = EntityId::parse(entity_id_str) else { continue };
        let Ok(attr_id) = AttrId::parse(attr_id_str) else { continue };

        let entry = by_entity.entry(entity_id).or_default();
        match registry.resolve_name(attr_id) {
            Some((_ns, attr_name)) => {
                entry.insert(attr_name, value.clone());
            }
            None if value.is_boolean() => {
                // Preserved workaround: an unresolved boolean-valued attribute is
                // filed as `completed` rather than dropped (spec §4.4.4 step 3).
                entry.insert("completed".to_string(), value.clone());
            }
            None => {
                warn!(%attr_id, "dropping datalog triple: attribute not in registry");
            }
        }
    }

    group_by_type(by_entity, fallback_namespace)
}

fn group_by_type(by_entity: BTreeMap<EntityId, Entity>, fallback_namespace: Option<&str>) -> BTreeMap<Namespace, Vec<Entity>> {
    let mut grouped: BTreeMap<Namespace, Vec<Entity>> = BTreeMap::new();
    for (entity_id, mut attrs) in by_entity {
        let namespace = attrs
            .get(TYPE_ATTR)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| fallback_namespace.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        attrs.insert("id".to_string(), Value::String(entity_id.to_string()));
        grouped.entry(namespace).or_default().push(attrs);
    }
    grouped
}

fn decode_collection_shape(payload: &Value) -> BTreeMap<Namespace, Vec<Entity>> {
    let mut grouped = BTreeMap::new();
    let Some(obj) = payload.as_object() else { return grouped };

    for (key, value) in obj {
        if PROTOCOL_KEYS.contains(&key.as_str()) {
            continue;
        }
        let Some(items) = value.as_array() else { continue };
        if items.is_empty() || !items.iter().all(Value::is_object) {
            continue;
        }
        let entities: Vec<Entity> = items.iter().filter_map(|v| v.as_object()).map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).collect();
        grouped.insert(key.clone(), entities);
    }
    grouped
}

/// Build the convergence operation list for one namespace (spec §4.4.4
/// "differential deletion"): every server-present entity is re-applied as
/// `add`, and every locally-known id missing from the server response is
/// deleted unless it was created too recently to have synced yet.
pub fn differential_operations(namespace: &str, decoded: &[Entity], local_ids: &[EntityId], is_recently_created: impl Fn(&EntityId) -> bool) -> Vec<Operation> {
    let server_ids: HashSet<EntityId> = decoded.iter().filter_map(entity_id_of).collect();
    let mut ops = Vec::with_capacity(decoded.len());

    for entity in decoded {
        let Some(entity_id) = entity_id_of(entity) else { continue };
        let mut data: BTreeMap<AttrName, Value> = entity.clone();
        data.remove("id");
        data.insert(TYPE_ATTR.to_string(), Value::String(namespace.to_string()));
        ops.push(Operation::Add { namespace: namespace.to_string(), entity_id, data });
    }

    for local_id in local_ids {
        if !server_ids.contains(local_id) && !is_recently_created(local_id) {
            ops.push(Operation::Delete { entity_id: *local_id, namespace: Some(namespace.to_string()) });
        }
    }
    ops
}

/// Translate inbound `tx-steps` into local operations (spec §4.4.3 `transact`,
/// §4.4.5). `add-attr` steps mutate the registry directly and contribute no
/// operation; `add-triple` steps are grouped by entity into one `Add` per
/// entity (re-applying `__type` is harmless and keeps remote-origin writes
/// simple); `delete-entity` steps map straight through.
pub fn apply_inbound_tx_steps(tx_steps: Vec<TxStep>, registry: &AttributeRegistry) -> Vec<Operation> {
    let mut grouped: BTreeMap<EntityId, (Option<Namespace>, BTreeMap<AttrName, Value>)> = BTreeMap::new();
    let mut ops = Vec::new();

    for step in tx_steps {
        match step {
            TxStep::AddTriple { entity_id, attr_id, value } => match registry.resolve_name(attr_id) {
                Some((namespace, attr_name)) => {
                    let entry = grouped.entry(entity_id).or_insert_with(|| (None, BTreeMap::new()));
                    entry.0.get_or_insert(namespace);
                    entry.1.insert(attr_name, value);
                }
                None => warn!(%attr_id, "dropping inbound triple: attribute not in registry"),
            },
            TxStep::DeleteEntity { entity_id, namespace } => ops.push(Operation::Delete { entity_id, namespace: Some(namespace) }),
            TxStep::AddAttr { descriptor } => registry.register(&descriptor),
        }
    }

    for (entity_id, (namespace, data)) in grouped {
        let Some(namespace) = namespace else { continue };
        ops.push(Operation::Add { namespace, entity_id, data });
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftbase_proto::AttrDescriptor;
    use serde_json::json;

    #[test]
    fn outbound_namespace_defaults_to_todos_when_no_op_carries_one() {
        let tx = Transaction::new_pending(driftbase_proto::TxId::new(), vec![Operation::Delete { entity_id: EntityId::new(), namespace: None }], chrono::Utc::now());
        assert_eq!(outbound_namespace(&tx), "todos");
    }

    #[test]
    fn translate_outbound_skips_unregistered_attributes() {
        let registry = AttributeRegistry::new();
        let entity_id = EntityId::new();
        let mut data = BTreeMap::new();
        data.insert("text".to_string(), json!("a"));
        let tx = Transaction::new_pending(
            driftbase_proto::TxId::new(),
            vec![Operation::Add { namespace: "todos".to_string(), entity_id, data }],
            chrono::Utc::now(),
        );
        let steps = translate_outbound(&tx, &registry);
        assert!(steps.is_empty());
    }

    #[test]
    fn translate_outbound_emits_add_triple_for_registered_attribute() {
        let registry = AttributeRegistry::new();
        let attr_id = AttrId::new();
        registry.register(&AttrDescriptor { id: attr_id, forward_identity: ("l".into(), "todos".into(), "text".into()) });
        let entity_id = EntityId::new();
        let mut data = BTreeMap::new();
        data.insert("text".to_string(), json!("a"));
        let tx = Transaction::new_pending(
            driftbase_proto::TxId::new(),
            vec![Operation::Add { namespace: "todos".to_string(), entity_id, data }],
            chrono::Utc::now(),
        );
        let steps = translate_outbound(&tx, &registry);
        assert_eq!(steps.len(), 1);
        assert!(matches!(&steps[0], TxStep::AddTriple { attr_id: got, .. } if *got == attr_id));
    }

    #[test]
    fn decode_collection_shape_picks_up_non_empty_object_lists() {
        let payload = json!({"op": "query-response", "todos": [{"id": "x", "text": "a"}]});
        let grouped = decode_collection_shape(&payload);
        assert_eq!(grouped["todos"].len(), 1);
    }

    #[test]
    fn differential_operations_deletes_missing_unless_recently_created() {
        let kept = EntityId::new();
        let missing_old = EntityId::new();
        let missing_recent = EntityId::new();
        let mut kept_entity = Entity::new();
        kept_entity.insert("id".to_string(), Value::String(kept.to_string()));
        let ops = differential_operations("todos", &[kept_entity], &[kept, missing_old, missing_recent], |id| *id == missing_recent);
        let deletes: Vec<_> = ops.iter().filter_map(|op| match op { Operation::Delete { entity_id, .. } => Some(*entity_id), _ => None }).collect();
        assert_eq!(deletes, vec![missing_old]);
    }

    #[test]
    fn apply_inbound_tx_steps_groups_triples_by_entity() {
        let registry = AttributeRegistry::new();
        let attr_id = AttrId::new();
        registry.register(&AttrDescriptor { id: attr_id, forward_identity: ("l".into(), "todos".into(), "text".into()) });
        let entity_id = EntityId::new();
        let steps = vec![TxStep::AddTriple { entity_id, attr_id, value: json!("hi") }];
        let ops = apply_inbound_tx_steps(steps, &registry);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], Operation::Add { namespace, .. } if namespace == "todos"));
    }

    #[test]
    fn apply_inbound_tx_steps_drops_triples_with_unknown_attribute() {
        let registry = AttributeRegistry::new();
        let entity_id = EntityId::new();
        let steps = vec![TxStep::AddTriple { entity_id, attr_id: AttrId::new(), value: json!("hi") }];
        assert!(apply_inbound_tx_steps(steps, &registry).is_empty());
    }
}
