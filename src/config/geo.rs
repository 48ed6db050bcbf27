use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_STORAGE: &str = "default";

/// Recognized toggles. Each one is read by exactly the component named in its doc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoFeatures {
    /// Scheduler selects and sync service fetches project wikis.
    pub wiki_sync: bool,
    /// Selective sync: nodes only replicate the namespaces they list.
    /// When disabled every node sees the full project population.
    pub namespace_restrictions: bool,
    /// Scheduler re-syncs projects updated on the primary since their last sync.
    pub dirty_refresh: bool,
}

impl Default for GeoFeatures {
    fn default() -> Self {
        Self {
            wiki_sync: true,
            namespace_restrictions: true,
            dirty_refresh: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub geo_database_configured: bool,
    pub db_retrieve_batch_size: usize,
    pub lease_timeout_secs: u64,
    pub max_run_time_secs: u64,
    pub pacing_millis: u64,
    pub mirror_timeout_secs: u64,
    pub scheduler_interval_secs: u64,
    pub event_batch_size: usize,
    /// Repository storage name to filesystem path. Empty means a single
    /// `default` storage under the data directory.
    pub storages: BTreeMap<String, PathBuf>,
    pub features: GeoFeatures,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            geo_database_configured: true,
            db_retrieve_batch_size: 1000,
            lease_timeout_secs: 3600,
            max_run_time_secs: 3600,
            pacing_millis: 1000,
            mirror_timeout_secs: 3 * 3600,
            scheduler_interval_secs: 60,
            event_batch_size: 500,
            storages: BTreeMap::new(),
            features: GeoFeatures::default(),
        }
    }
}

impl GeoConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: GeoConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_retrieve_batch_size == 0 {
            return Err(Error::Config(
                "db_retrieve_batch_size must be positive".to_string(),
            ));
        }
        if self.event_batch_size == 0 {
            return Err(Error::Config("event_batch_size must be positive".to_string()));
        }
        if self.lease_timeout_secs == 0 {
            return Err(Error::Config("lease_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn storage_paths(&self, data_dir: &Path) -> BTreeMap<String, PathBuf> {
        if self.storages.is_empty() {
            let mut storages = BTreeMap::new();
            storages.insert(DEFAULT_STORAGE.to_string(), data_dir.join("repositories"));
            return storages;
        }
        self.storages.clone()
    }

    #[must_use]
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    #[must_use]
    pub fn max_run_time(&self) -> Duration {
        Duration::from_secs(self.max_run_time_secs)
    }

    #[must_use]
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_millis)
    }

    #[must_use]
    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout_secs)
    }

    #[must_use]
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }
}
