mod common;

use common::{add_todo, local_db, todo_texts};
use serde_json::json;

#[tokio::test]
async fn create_then_query_sees_the_new_entity() {
    let db = local_db();
    add_todo(&db, "buy milk", false);

    let handle = db.query(json!({"todos": {}})).unwrap();
    let rows = handle.get().as_success().cloned().unwrap();
    assert_eq!(todo_texts(&rows["todos"]), vec!["buy milk"]);
}

#[tokio::test]
async fn query_before_any_write_returns_an_empty_collection() {
    let db = local_db();
    let handle = db.query(json!({"todos": {}})).unwrap();
    assert_eq!(handle.get().as_success().unwrap()["todos"].len(), 0);
}

#[tokio::test]
async fn repeated_query_for_the_same_description_returns_the_same_handle() {
    let db = local_db();
    add_todo(&db, "first", false);
    let a = db.query(json!({"todos": {"limit": 10}})).unwrap();
    let b = db.query(json!({"todos": {"limit": 10}})).unwrap();

    add_todo(&db, "second", false);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(a.get().as_success().unwrap()["todos"].len(), 2);
    assert_eq!(b.get().as_success().unwrap()["todos"].len(), 2);
}

#[tokio::test]
async fn empty_transact_batch_is_rejected() {
    let db = local_db();
    assert!(db.transact(vec![]).is_err());
}
