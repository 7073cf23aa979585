mod common;

use common::local_db;
use driftbase_core::OpInput;
use driftbase_proto::EntityId;
use serde_json::json;
use std::collections::BTreeMap;

#[tokio::test]
async fn plural_include_attaches_child_rows_to_their_parent() {
    let db = local_db();

    let author_id = EntityId::new();
    let mut author = BTreeMap::new();
    author.insert("name".to_string(), json!("ada"));
    db.transact(vec![OpInput::Add { namespace: "users".to_string(), entity_id: author_id, data: author }]).unwrap();

    let mut post = BTreeMap::new();
    post.insert("title".to_string(), json!("hello world"));
    post.insert("authorId".to_string(), json!(author_id.to_string()));
    db.transact(vec![OpInput::Add { namespace: "posts".to_string(), entity_id: EntityId::new(), data: post }]).unwrap();

    let handle = db.query(json!({"users": {"include": {"posts": {}}}})).unwrap();
    let rows = handle.get().as_success().cloned().unwrap();
    let posts = rows["users"][0]["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["title"], json!("hello world"));
}

#[tokio::test]
async fn singular_include_attaches_the_parent_row_to_its_child() {
    let db = local_db();

    let author_id = EntityId::new();
    let mut author = BTreeMap::new();
    author.insert("name".to_string(), json!("ada"));
    db.transact(vec![OpInput::Add { namespace: "users".to_string(), entity_id: author_id, data: author }]).unwrap();

    let mut post = BTreeMap::new();
    post.insert("title".to_string(), json!("hello world"));
    post.insert("authorId".to_string(), json!(author_id.to_string()));
    db.transact(vec![OpInput::Add { namespace: "posts".to_string(), entity_id: EntityId::new(), data: post }]).unwrap();

    let handle = db.query(json!({"posts": {"include": {"author": {}}}})).unwrap();
    let rows = handle.get().as_success().cloned().unwrap();
    assert_eq!(rows["posts"][0]["author"]["name"], json!("ada"));
}
