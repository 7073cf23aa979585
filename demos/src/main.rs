//! A minimal todo-list CLI built on `driftbase`, demonstrating the create /
//! query / toggle / sync lifecycle end to end against a running server.

use std::{collections::BTreeMap, time::Duration};

use anyhow::Result;
use clap::Parser;
use driftbase::{config::Config, core::OpInput, proto::EntityId, Db};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "driftbase todo-list demo")]
struct Args {
    /// Scopes persistence and the sync URL.
    #[arg(long, default_value = "driftbase-demo")]
    app_id: String,

    /// Protocol + host the WebSocket URL is derived from.
    #[arg(long, default_value = "ws://localhost:9797")]
    base_url: String,

    /// Run entirely offline, with every transaction staying `pending`.
    #[arg(long)]
    offline: bool,

    #[arg(long)]
    verbose: bool,

    /// Text of a todo to add before listing everything.
    #[arg(long)]
    add: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    driftbase::init_tracing(args.verbose);

    let persistence_dir = dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("driftbase-demo").join(&args.app_id);

    let config = Config::new(args.app_id, args.base_url)
        .with_sync_enabled(!args.offline)
        .with_persistence_dir(persistence_dir)
        .with_verbose_logging(args.verbose);

    let db = Db::open(config)?;

    if let Some(text) = args.add {
        let entity_id = EntityId::new();
        let mut data = BTreeMap::new();
        data.insert("text".to_string(), json!(text));
        data.insert("completed".to_string(), json!(false));
        let result = db.transact(vec![OpInput::Add { namespace: "todos".to_string(), entity_id, data }])?;
        info!(tx_id = %result.tx_id, "added todo");
    }

    if !args.offline {
        // Give the Sync Engine a moment to connect before the first read,
        // so the printed list already reflects any remote state.
        tokio::time::sleep(Duration::from_millis(500)).await;
        info!(connected = db.is_connected(), "sync status");
    }

    let handle = db.query(json!({"todos": {"order": {"text": "asc"}}}))?;
    let todos = handle.get().as_success().cloned().unwrap_or_default();
    for row in todos.get("todos").cloned().unwrap_or_default() {
        println!("[{}] {}", if row.get("completed") == Some(&json!(true)) { "x" } else { " " }, row.get("text").unwrap_or(&json!("")));
    }

    db.shutdown();
    Ok(())
}
