mod commands;
mod node;
pub mod poller;
pub mod render;

pub use commands::{AdminCommands, NodeCommands, RoleArg};
pub use node::{run_init, run_node_add, run_node_list, run_node_remove};
pub use poller::{SmartInterval, run_status};

use std::path::Path;

use crate::store::SqliteStore;

/// Initialize store from data directory, checking it exists
pub fn init_store(data_dir: &str) -> anyhow::Result<SqliteStore> {
    let db_path = Path::new(data_dir).join("geosync.db");

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'geosync admin init' first.",
            db_path.display()
        );
    }

    SqliteStore::new(&db_path).map_err(Into::into)
}
