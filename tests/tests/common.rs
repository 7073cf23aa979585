use std::{collections::BTreeMap, str::FromStr, sync::Arc};

use driftbase::{config::Config, Db};
use driftbase_core::OpInput;
use driftbase_proto::{EntityId, Value};
use serde_json::json;
use tracing::Level;

#[ctor::ctor]
fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").ok().and_then(|l| Level::from_str(&l).ok()).unwrap_or(Level::WARN);
    let _ = tracing_subscriber::fmt().with_max_level(level).with_test_writer().try_init();
}

/// A local-only (`sync_enabled = false`) in-memory `Db`, for tests that only
/// exercise the Triple Store, Transaction Engine, and Query Engine.
pub fn local_db() -> Arc<Db> {
    Db::open(Config::new("test-app", "http://localhost:8080").with_sync_enabled(false)).unwrap()
}

pub fn add_todo(db: &Db, text: &str, completed: bool) -> EntityId {
    let entity_id = EntityId::new();
    let mut data = BTreeMap::new();
    data.insert("text".to_string(), json!(text));
    data.insert("completed".to_string(), json!(completed));
    db.transact(vec![OpInput::Add { namespace: "todos".to_string(), entity_id, data }]).unwrap();
    entity_id
}

pub fn set_completed(db: &Db, entity_id: EntityId, completed: bool) {
    let mut data = BTreeMap::new();
    data.insert("completed".to_string(), json!(completed));
    db.transact(vec![OpInput::Update { namespace: "todos".to_string(), entity_id, data }]).unwrap();
}

pub fn todo_texts(rows: &[BTreeMap<String, Value>]) -> Vec<String> {
    rows.iter().filter_map(|r| r.get("text").and_then(Value::as_str).map(str::to_string)).collect()
}
