use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Reports which repository storages can currently be written to.
pub trait ShardHealth: Send + Sync {
    fn healthy_storages(&self) -> Vec<String>;
}

/// A storage is healthy when its configured path is an existing directory.
pub struct FsShardHealth {
    storages: BTreeMap<String, PathBuf>,
}

impl FsShardHealth {
    pub fn new(storages: BTreeMap<String, PathBuf>) -> Self {
        Self { storages }
    }

    pub fn path(&self, storage: &str) -> Option<&Path> {
        self.storages.get(storage).map(PathBuf::as_path)
    }
}

impl ShardHealth for FsShardHealth {
    fn healthy_storages(&self) -> Vec<String> {
        self.storages
            .iter()
            .filter_map(|(name, path)| {
                if path.is_dir() {
                    Some(name.clone())
                } else {
                    tracing::debug!("Storage {name} at {} is unavailable", path.display());
                    None
                }
            })
            .collect()
    }
}
