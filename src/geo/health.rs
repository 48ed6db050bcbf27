use std::sync::Arc;

use chrono::Utc;

use crate::config::GeoConfig;
use crate::error::{Error, Result};
use crate::store::Store;

/// Health checks queried by tag. An empty string means healthy; anything else
/// is a free-text diagnostic.
pub trait HealthCheck: Send + Sync {
    fn process_checks(&self, checks: &[&str]) -> Result<String>;
    /// Seconds this installation's database trails the primary, if known.
    fn db_replication_lag(&self) -> Result<Option<i64>>;
}

/// Checks the local database and this installation's node registration.
pub struct LocalHealthCheck {
    store: Arc<dyn Store>,
    config: Arc<GeoConfig>,
    node_url: String,
}

impl LocalHealthCheck {
    pub fn new(store: Arc<dyn Store>, config: Arc<GeoConfig>, node_url: impl Into<String>) -> Self {
        Self {
            store,
            config,
            node_url: node_url.into(),
        }
    }

    fn geo_failures(&self) -> Vec<String> {
        if let Err(e) = self.store.ping() {
            return vec![format!("Database is not reachable: {e}")];
        }

        let node = match self.store.find_node_by_url(&self.node_url) {
            Ok(Some(node)) => node,
            Ok(None) => {
                return vec![format!(
                    "This installation ({}) is not registered as a Geo node",
                    self.node_url
                )];
            }
            Err(e) => return vec![format!("Could not look up the current node: {e}")],
        };

        let mut failures = Vec::new();
        if node.is_secondary() {
            if !self.config.geo_database_configured {
                failures.push("Geo database is not configured".to_string());
            }
            if !node.enabled {
                failures.push("Geo node is disabled".to_string());
            }
        }

        match (
            self.store.get_event_log_state(node.id),
            self.store.last_event(),
        ) {
            (Ok(Some(cursor)), Ok(last)) => {
                let last_id = last.map_or(0, |event| event.id);
                if cursor.event_id > last_id {
                    failures.push(format!(
                        "Event log cursor ({}) is ahead of the event log ({last_id})",
                        cursor.event_id
                    ));
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                failures.push(format!("Could not read the event log: {e}"));
            }
            _ => {}
        }

        failures
    }
}

impl HealthCheck for LocalHealthCheck {
    fn process_checks(&self, checks: &[&str]) -> Result<String> {
        let mut failures = Vec::new();
        for check in checks {
            match *check {
                "geo" => failures.extend(self.geo_failures()),
                other => return Err(Error::BadRequest(format!("unknown health check: {other}"))),
            }
        }
        Ok(failures.join("\n"))
    }

    fn db_replication_lag(&self) -> Result<Option<i64>> {
        let beat = self.store.last_heartbeat()?;
        Ok(beat.map(|at| (Utc::now() - at).num_seconds().max(0)))
    }
}
