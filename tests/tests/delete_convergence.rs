mod common;

use common::{add_todo, local_db};
use driftbase_core::OpInput;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn deleting_an_entity_removes_it_from_a_live_query() {
    let db = local_db();
    let id = add_todo(&db, "to be removed", false);

    let handle = db.query(json!({"todos": {}})).unwrap();
    assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 1);

    db.transact(vec![OpInput::Delete { entity_id: id.to_string() }]).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handle.get().as_success().unwrap()["todos"].is_empty());
}

#[tokio::test]
async fn deleting_a_nonexistent_entity_is_a_harmless_noop() {
    let db = local_db();
    let result = db.transact(vec![OpInput::Delete { entity_id: driftbase_proto::EntityId::new().to_string() }]);
    assert!(result.is_ok());
}
