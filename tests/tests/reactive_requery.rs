mod common;

use common::{add_todo, local_db, set_completed};
use driftbase_core::QueryState;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn toggling_completed_reruns_a_filtered_query_within_the_coalescing_window() {
    let db = local_db();
    let id = add_todo(&db, "finish driftbase", false);

    let handle = db.query(json!({"todos": {"where": {"completed": true}}})).unwrap();
    assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 0);

    set_completed(&db, id, true);

    let updated = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            if let QueryState::Success(r) = handle.changed().await {
                if r["todos"].len() == 1 {
                    return;
                }
            }
        }
    })
    .await;
    assert!(updated.is_ok(), "query did not re-run after the underlying write");
}

#[tokio::test]
async fn unrelated_namespace_writes_do_not_trigger_a_requery() {
    let db = local_db();
    add_todo(&db, "a todo", false);
    let handle = db.query(json!({"todos": {}})).unwrap();
    assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 1);

    // Write into a different namespace entirely.
    let other = driftbase_proto::EntityId::new();
    let mut data = std::collections::BTreeMap::new();
    data.insert("name".to_string(), json!("alice"));
    db.transact(vec![driftbase_core::OpInput::Add { namespace: "users".to_string(), entity_id: other, data }]).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 1);
}
