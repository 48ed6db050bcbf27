use std::sync::Arc;

use chrono::Utc;

use super::RepositoryMirror;
use crate::config::GeoFeatures;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{GeoNode, Project, RepoKind, SyncState};

const MAX_FAILURE_LENGTH: usize = 255;

/// Terminal state of each part after one attempt. `wiki` is `None` when the
/// wiki was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub repository: SyncState,
    pub wiki: Option<SyncState>,
}

/// Runs one synchronization attempt for one project on one secondary.
pub struct ProjectSyncService {
    store: Arc<dyn Store>,
    mirror: Arc<dyn RepositoryMirror>,
    features: GeoFeatures,
}

impl ProjectSyncService {
    pub fn new(
        store: Arc<dyn Store>,
        mirror: Arc<dyn RepositoryMirror>,
        features: GeoFeatures,
    ) -> Self {
        Self {
            store,
            mirror,
            features,
        }
    }

    pub async fn sync(&self, node_id: i64, project_id: i64) -> Result<SyncOutcome> {
        let node = self.store.get_node(node_id)?.ok_or(Error::NotFound)?;
        let project = self.store.get_project(project_id)?.ok_or(Error::NotFound)?;
        let primary = self
            .store
            .get_primary_node()?
            .ok_or_else(|| Error::Config("no primary node is registered".to_string()))?;
        let primary_url = primary.url();

        let repository = self
            .sync_part(&node, &project, &primary_url, RepoKind::Repository)
            .await?;

        let wiki = if project.wiki_enabled && self.features.wiki_sync {
            Some(
                self.sync_part(&node, &project, &primary_url, RepoKind::Wiki)
                    .await?,
            )
        } else {
            None
        };

        if repository == SyncState::Synced {
            self.store.expire_repository_cache(project.id)?;
        }

        Ok(SyncOutcome { repository, wiki })
    }

    async fn sync_part(
        &self,
        node: &GeoNode,
        project: &Project,
        primary_url: &str,
        kind: RepoKind,
    ) -> Result<SyncState> {
        let started_at = Utc::now();

        match self.mirror.fetch(primary_url, project, kind).await {
            Ok(()) => {
                self.store
                    .record_sync_success(node.id, project.id, kind, started_at)?;
                tracing::debug!("Synced {} of project {}", kind.as_str(), project.id);
                Ok(SyncState::Synced)
            }
            Err(e) => {
                tracing::warn!(
                    "Error syncing {} of project {} ({}): {e}",
                    kind.as_str(),
                    project.id,
                    project.disk_path
                );
                let reason = truncate(&e.to_string(), MAX_FAILURE_LENGTH);
                self.store
                    .record_sync_failure(node.id, project.id, kind, &reason)?;
                Ok(SyncState::SyncFailed)
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{NewNode, NewProject, NodeRole};
    use tempfile::TempDir;

    /// Fails every fetch of the listed kinds.
    struct ScriptedMirror {
        failing: HashSet<RepoKind>,
        fetched: Mutex<Vec<(i64, RepoKind)>>,
    }

    #[async_trait]
    impl RepositoryMirror for ScriptedMirror {
        async fn fetch(&self, _primary_url: &str, project: &Project, kind: RepoKind) -> Result<()> {
            self.fetched.lock().unwrap().push((project.id, kind));
            if self.failing.contains(&kind) {
                Err(Error::Mirror(format!("{}: connection reset", "x".repeat(300))))
            } else {
                Ok(())
            }
        }
    }

    fn setup(failing: &[RepoKind], features: GeoFeatures) -> (TempDir, Arc<SqliteStore>, ProjectSyncService, i64, i64) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(temp_dir.path().join("geosync.db")).unwrap());
        store.initialize().unwrap();

        store
            .create_node(&NewNode::from_url("http://geo-1/", NodeRole::Primary).unwrap())
            .unwrap();
        let secondary = store
            .create_node(&NewNode::from_url("http://geo-2/", NodeRole::Secondary).unwrap())
            .unwrap();
        let ns = store.create_namespace("group", None).unwrap();
        let project = store
            .create_project(&NewProject {
                namespace_id: ns.id,
                name: "a".to_string(),
                disk_path: "group/a".to_string(),
                repository_storage: "default".to_string(),
                wiki_enabled: true,
                last_repository_updated_at: Some(Utc::now()),
            })
            .unwrap();

        let mirror = Arc::new(ScriptedMirror {
            failing: failing.iter().copied().collect(),
            fetched: Mutex::new(Vec::new()),
        });
        let service = ProjectSyncService::new(store.clone(), mirror, features);
        (temp_dir, store, service, secondary.id, project.id)
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (_dir, store, service, node_id, project_id) = setup(&[], GeoFeatures::default());

        let first = service.sync(node_id, project_id).await.unwrap();
        let second = service.sync(node_id, project_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.repository, SyncState::Synced);
        assert_eq!(second.wiki, Some(SyncState::Synced));

        let registry = store.get_project_registry(node_id, project_id).unwrap().unwrap();
        assert_eq!(registry.repository.retry_count, 0);
        assert!(!registry.repository.is_dirty(None));
    }

    #[tokio::test]
    async fn test_wiki_failure_leaves_repository_synced() {
        let (_dir, store, service, node_id, project_id) =
            setup(&[RepoKind::Wiki], GeoFeatures::default());

        let outcome = service.sync(node_id, project_id).await.unwrap();
        assert_eq!(outcome.repository, SyncState::Synced);
        assert_eq!(outcome.wiki, Some(SyncState::SyncFailed));

        let registry = store.get_project_registry(node_id, project_id).unwrap().unwrap();
        assert_eq!(registry.wiki.retry_count, 1);
        let failure = registry.wiki.last_failure.unwrap();
        assert_eq!(failure.chars().count(), MAX_FAILURE_LENGTH);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_success() {
        let (_dir, store, service, node_id, project_id) = setup(&[], GeoFeatures::default());
        service.sync(node_id, project_id).await.unwrap();
        let synced = store.get_project_registry(node_id, project_id).unwrap().unwrap();

        let failing = ProjectSyncService::new(
            store.clone(),
            Arc::new(ScriptedMirror {
                failing: [RepoKind::Repository].into_iter().collect(),
                fetched: Mutex::new(Vec::new()),
            }),
            GeoFeatures::default(),
        );
        let outcome = failing.sync(node_id, project_id).await.unwrap();
        assert_eq!(outcome.repository, SyncState::SyncFailed);

        let failed = store.get_project_registry(node_id, project_id).unwrap().unwrap();
        assert_eq!(
            failed.repository.last_successful_sync_at,
            synced.repository.last_successful_sync_at
        );
    }

    #[tokio::test]
    async fn test_wiki_skipped_when_disabled() {
        let features = GeoFeatures {
            wiki_sync: false,
            ..GeoFeatures::default()
        };
        let (_dir, store, service, node_id, project_id) = setup(&[], features);

        let outcome = service.sync(node_id, project_id).await.unwrap();
        assert_eq!(outcome.wiki, None);

        let registry = store.get_project_registry(node_id, project_id).unwrap().unwrap();
        assert_eq!(registry.wiki.state, SyncState::NeverSynced);
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let (_dir, _store, service, node_id, _) = setup(&[], GeoFeatures::default());
        assert!(matches!(service.sync(node_id, 999).await, Err(Error::NotFound)));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
