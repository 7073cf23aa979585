mod common;

use driftbase::{config::Config, Db};
use driftbase_core::OpInput;
use driftbase_proto::{EntityId, TransactionStatus};
use serde_json::json;
use std::collections::BTreeMap;

fn scratch_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("driftbase-test-{}", EntityId::new()))
}

#[tokio::test]
async fn a_pending_transaction_survives_a_restart_of_the_store() {
    let dir = scratch_dir();
    let entity_id = EntityId::new();

    {
        let db = Db::open(Config::new("app", "http://localhost").with_sync_enabled(false).with_persistence_dir(&dir)).unwrap();
        let mut data = BTreeMap::new();
        data.insert("text".to_string(), json!("survive a restart"));
        let result = db.transact(vec![OpInput::Add { namespace: "todos".to_string(), entity_id, data }]).unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
    }

    {
        let db = Db::open(Config::new("app", "http://localhost").with_sync_enabled(false).with_persistence_dir(&dir)).unwrap();
        let handle = db.query(json!({"todos": {}})).unwrap();
        let rows = handle.get().as_success().cloned().unwrap();
        assert_eq!(rows["todos"].len(), 1);
        assert_eq!(rows["todos"][0]["text"], json!("survive a restart"));
    }

    std::fs::remove_dir_all(&dir).ok();
}
