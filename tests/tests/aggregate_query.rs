mod common;

use common::local_db;
use driftbase_core::OpInput;
use driftbase_proto::EntityId;
use serde_json::json;
use std::collections::BTreeMap;

fn add_post(db: &driftbase::Db, category: &str, views: i64) {
    let entity_id = EntityId::new();
    let mut data = BTreeMap::new();
    data.insert("category".to_string(), json!(category));
    data.insert("views".to_string(), json!(views));
    db.transact(vec![OpInput::Add { namespace: "posts".to_string(), entity_id, data }]).unwrap();
}

#[tokio::test]
async fn count_star_over_the_whole_namespace() {
    let db = local_db();
    add_post(&db, "news", 10);
    add_post(&db, "news", 20);
    add_post(&db, "sports", 5);

    let handle = db.query(json!({"posts": {"$aggregate": {"count": "*"}}})).unwrap();
    let rows = handle.get().as_success().cloned().unwrap();
    assert_eq!(rows["posts"][0]["count"], json!(3));
}

#[tokio::test]
async fn group_by_reduces_each_group_independently() {
    let db = local_db();
    add_post(&db, "news", 10);
    add_post(&db, "news", 20);
    add_post(&db, "sports", 5);

    let handle = db.query(json!({"posts": {"$aggregate": {"total": {"sum": "views"}}, "$groupBy": "category"}})).unwrap();
    let rows = handle.get().as_success().cloned().unwrap();
    let groups = &rows["posts"];
    assert_eq!(groups.len(), 2);
    let news = groups.iter().find(|r| r["category"] == json!("news")).unwrap();
    assert_eq!(news["total"], json!(30.0));
}
