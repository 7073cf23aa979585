mod common;

use common::{add_todo, local_db};
use driftbase_core::OpInput;

#[tokio::test]
async fn delete_with_a_json_array_wrapped_id_is_repaired_and_applied() {
    let db = local_db();
    let id = add_todo(&db, "stray wrapper", false);
    let wrapped = format!("[\"{id}\", \"trailing-garbage\"]");
    assert!(db.transact(vec![OpInput::Delete { entity_id: wrapped }]).is_ok());
}

#[tokio::test]
async fn delete_with_an_embedded_uuid_substring_is_repaired_and_applied() {
    let db = local_db();
    let id = add_todo(&db, "legacy format", false);
    let noisy = format!("entity:{id}:legacy");
    assert!(db.transact(vec![OpInput::Delete { entity_id: noisy }]).is_ok());
}

#[tokio::test]
async fn delete_with_an_unrecoverable_id_is_rejected_without_touching_the_store() {
    let db = local_db();
    let err = db.transact(vec![OpInput::Delete { entity_id: "definitely-not-an-id".to_string() }]);
    assert!(err.is_err());
}
