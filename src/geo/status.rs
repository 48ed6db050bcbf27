use std::sync::Arc;

use crate::config::GeoFeatures;
use crate::error::Result;
use crate::store::{FileClass, FileCounts, NodeScope, Store};
use crate::types::{GeoNode, NodeStatus, RepoKind, SyncState, sync_percentage};

/// Computes [`NodeStatus`] snapshots. Never fails: unreadable counters are
/// logged and reported as zero.
pub struct StatusAggregator {
    store: Arc<dyn Store>,
    health: Arc<dyn super::HealthCheck>,
    features: GeoFeatures,
}

impl StatusAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        health: Arc<dyn super::HealthCheck>,
        features: GeoFeatures,
    ) -> Self {
        Self {
            store,
            health,
            features,
        }
    }

    pub fn compute(&self, node: &GeoNode) -> NodeStatus {
        let scope = NodeScope::for_node(node, &self.features);
        let mut status = NodeStatus::default();

        if node.is_secondary() {
            let (healthy, health) = self.health_summary();
            status.healthy = healthy;
            status.health = health;
            status.db_replication_lag = self.health.db_replication_lag().unwrap_or_else(|e| {
                tracing::warn!("Could not determine replication lag: {e}");
                None
            });
        } else {
            status.healthy = true;
        }

        status.repositories_count = counted("repositories", self.store.count_projects(scope));
        status.repositories_synced_count = counted(
            "synced repositories",
            self.store
                .count_registries(scope, RepoKind::Repository, SyncState::Synced),
        );
        status.repositories_failed_count = counted(
            "failed repositories",
            self.store
                .count_registries(scope, RepoKind::Repository, SyncState::SyncFailed),
        );
        status.repositories_synced_in_percentage =
            sync_percentage(status.repositories_synced_count, status.repositories_count);

        let lfs = self.file_counts(scope, FileClass::LfsObjects);
        status.lfs_objects_count = lfs.total;
        status.lfs_objects_synced_count = lfs.synced;
        status.lfs_objects_failed_count = lfs.failed;
        status.lfs_objects_synced_in_percentage = sync_percentage(lfs.synced, lfs.total);

        let attachments = self.file_counts(scope, FileClass::Attachments);
        status.attachments_count = attachments.total;
        status.attachments_synced_count = attachments.synced;
        status.attachments_failed_count = attachments.failed;
        status.attachments_synced_in_percentage =
            sync_percentage(attachments.synced, attachments.total);

        match self.store.last_event() {
            Ok(Some(event)) => {
                status.last_event_id = Some(event.id);
                status.last_event_date = Some(event.created_at);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not read the last event: {e}"),
        }

        // A primary has no cursor into its own log.
        if node.is_secondary() {
            self.fill_cursor(node, &mut status);
        }

        status
    }

    fn health_summary(&self) -> (bool, String) {
        match self.health.process_checks(&["geo"]) {
            Ok(text) => {
                let line = text.lines().next().unwrap_or("").trim();
                (line.is_empty(), escape_html(line))
            }
            Err(e) => {
                tracing::warn!("Health check failed: {e}");
                (false, escape_html(&format!("Unknown: {e}")))
            }
        }
    }

    fn file_counts(&self, scope: NodeScope, class: FileClass) -> FileCounts {
        self.store.count_files(scope, class).unwrap_or_else(|e| {
            tracing::warn!("Could not count {class:?} for node {}: {e}", scope.node_id);
            FileCounts::default()
        })
    }

    fn fill_cursor(&self, node: &GeoNode, status: &mut NodeStatus) {
        let cursor = match self.store.get_event_log_state(node.id) {
            Ok(Some(state)) => state.event_id,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Could not read event cursor of node {}: {e}", node.id);
                return;
            }
        };

        status.cursor_last_event_id = Some(cursor);
        match self.store.get_event(cursor) {
            Ok(event) => status.cursor_last_event_date = event.map(|e| e.created_at),
            Err(e) => tracing::warn!("Could not resolve cursor event {cursor}: {e}"),
        }
    }
}

fn counted(what: &str, count: Result<u64>) -> u64 {
    count.unwrap_or_else(|e| {
        tracing::warn!("Could not count {what}: {e}");
        0
    })
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::error::Error;
    use crate::geo::HealthCheck;
    use crate::store::SqliteStore;
    use crate::types::{NewNode, NewProject, NodeRole};
    use tempfile::TempDir;

    struct FixedHealth {
        text: Result<String>,
        calls: AtomicUsize,
    }

    impl FixedHealth {
        fn new(text: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                text,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl HealthCheck for FixedHealth {
        fn process_checks(&self, _checks: &[&str]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.text {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Mirror(e.to_string())),
            }
        }

        fn db_replication_lag(&self) -> Result<Option<i64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(42))
        }
    }

    fn setup() -> (TempDir, Arc<SqliteStore>) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("geosync.db")).unwrap();
        store.initialize().unwrap();
        (temp_dir, Arc::new(store))
    }

    fn node(store: &SqliteStore, url: &str, role: NodeRole) -> GeoNode {
        store
            .create_node(&NewNode::from_url(url, role).unwrap())
            .unwrap()
    }

    #[test]
    fn test_empty_node_reports_zero_not_nan() {
        let (_dir, store) = setup();
        let secondary = node(&store, "http://geo-2/", NodeRole::Secondary);
        let aggregator =
            StatusAggregator::new(store, FixedHealth::new(Ok(String::new())), GeoFeatures::default());

        let status = aggregator.compute(&secondary);
        assert!(status.healthy);
        assert_eq!(status.health, "");
        assert_eq!(status.repositories_count, 0);
        assert_eq!(status.repositories_synced_in_percentage, 0.0);
        assert_eq!(status.lfs_objects_synced_in_percentage, 0.0);
        assert_eq!(status.attachments_synced_in_percentage, 0.0);
        assert_eq!(status.last_event_id, None);
        assert_eq!(status.last_event_date, None);
        assert_eq!(status.db_replication_lag, Some(42));
    }

    #[test]
    fn test_primary_never_consults_health_check() {
        let (_dir, store) = setup();
        let primary = node(&store, "http://geo-1/", NodeRole::Primary);
        let health = FixedHealth::new(Ok("should not be read".to_string()));
        let aggregator = StatusAggregator::new(store, health.clone(), GeoFeatures::default());

        let status = aggregator.compute(&primary);
        assert_eq!(status.db_replication_lag, None);
        assert_eq!(status.cursor_last_event_id, None);
        assert!(status.healthy);
        assert_eq!(health.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_health_text_first_line_escaped() {
        let (_dir, store) = setup();
        let secondary = node(&store, "http://geo-2/", NodeRole::Secondary);
        let health = FixedHealth::new(Ok("Geo <database> is down\nstack trace".to_string()));
        let aggregator = StatusAggregator::new(store, health, GeoFeatures::default());

        let status = aggregator.compute(&secondary);
        assert!(!status.healthy);
        assert_eq!(status.health, "Geo &lt;database&gt; is down");
    }

    #[test]
    fn test_unreachable_health_check_is_unknown() {
        let (_dir, store) = setup();
        let secondary = node(&store, "http://geo-2/", NodeRole::Secondary);
        let health = FixedHealth::new(Err(Error::Timeout("health".to_string())));
        let aggregator = StatusAggregator::new(store, health, GeoFeatures::default());

        let status = aggregator.compute(&secondary);
        assert!(!status.healthy);
        assert!(status.health.starts_with("Unknown"));
    }

    #[test]
    fn test_cursor_resolves_event_date() {
        let (_dir, store) = setup();
        let secondary = node(&store, "http://geo-2/", NodeRole::Secondary);
        let ns = store.create_namespace("group", None).unwrap();
        let project = store
            .create_project(&NewProject {
                namespace_id: ns.id,
                name: "a".to_string(),
                disk_path: "group/a".to_string(),
                repository_storage: "default".to_string(),
                wiki_enabled: false,
                last_repository_updated_at: Some(Utc::now()),
            })
            .unwrap();

        let first = store
            .append_event(&crate::types::NewEvent {
                event_type: crate::types::EventType::RepositoryUpdated,
                project_id: project.id,
                source: None,
            })
            .unwrap();
        let last = store
            .append_event(&crate::types::NewEvent {
                event_type: crate::types::EventType::RepositoryUpdated,
                project_id: project.id,
                source: None,
            })
            .unwrap();
        store.advance_event_cursor(secondary.id, first.id).unwrap();

        let aggregator =
            StatusAggregator::new(store, FixedHealth::new(Ok(String::new())), GeoFeatures::default());
        let status = aggregator.compute(&secondary);

        assert_eq!(status.last_event_id, Some(last.id));
        assert_eq!(status.cursor_last_event_id, Some(first.id));
        assert_eq!(
            status.cursor_last_event_date.map(|d| d.timestamp_micros()),
            Some(first.created_at.timestamp_micros())
        );
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a & 'b'"), "a &amp; &#39;b&#39;");
    }
}
