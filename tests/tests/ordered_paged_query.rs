mod common;

use common::{add_todo, local_db, todo_texts};
use serde_json::json;

#[tokio::test]
async fn order_desc_then_limit_and_offset_page_through_results() {
    let db = local_db();
    for text in ["alpha", "bravo", "charlie", "delta"] {
        add_todo(&db, text, false);
    }

    let handle = db.query(json!({"todos": {"order": {"text": "desc"}, "limit": 2, "offset": 1}})).unwrap();
    let rows = handle.get().as_success().cloned().unwrap();
    assert_eq!(todo_texts(&rows["todos"]), vec!["charlie", "bravo"]);
}

#[tokio::test]
async fn offset_beyond_the_result_set_yields_an_empty_page() {
    let db = local_db();
    add_todo(&db, "only one", false);

    let handle = db.query(json!({"todos": {"offset": 5}})).unwrap();
    assert!(handle.get().as_success().unwrap()["todos"].is_empty());
}

#[tokio::test]
async fn where_clause_narrows_the_result_set() {
    let db = local_db();
    add_todo(&db, "done already", true);
    add_todo(&db, "still pending", false);

    let handle = db.query(json!({"todos": {"where": {"completed": true}}})).unwrap();
    assert_eq!(todo_texts(&handle.get().as_success().unwrap()["todos"]), vec!["done already"]);
}
