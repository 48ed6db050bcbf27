#![allow(dead_code)]

pub mod test_server;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use geosync::config::{GeoConfig, GeoFeatures};
use geosync::error::{Error, Result};
use geosync::geo::{
    ExclusiveLease, JobQueue, ProjectSyncService, RepositoryMirror, RepositorySyncScheduler,
    ShardHealth, StoreLease,
};
use geosync::store::{SqliteStore, Store};
use geosync::types::{GeoNode, Namespace, NewNode, NewProject, NodeRole, Project, RepoKind};
use tempfile::TempDir;

/// Isolated database with a primary already registered.
pub struct Fixture {
    pub temp_dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub primary: GeoNode,
}

impl Fixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::new(temp_dir.path().join("geosync.db")).expect("open store");
        store.initialize().expect("initialize schema");
        let store = Arc::new(store);

        let primary = store
            .create_node(&NewNode::from_url("http://primary.example.com/", NodeRole::Primary).expect("url"))
            .expect("create primary");

        Self {
            temp_dir,
            store,
            primary,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn secondary(&self, url: &str, capacity: u32) -> GeoNode {
        let mut node = NewNode::from_url(url, NodeRole::Secondary).expect("url");
        node.repos_max_capacity = capacity;
        self.store.create_node(&node).expect("create secondary")
    }

    pub fn restrict(&self, node: &GeoNode, namespace_ids: &[i64]) -> GeoNode {
        let mut node = node.clone();
        node.namespace_ids = namespace_ids.to_vec();
        self.store.update_node(&node).expect("update node");
        self.store.get_node(node.id).expect("get node").expect("node exists")
    }

    pub fn namespace(&self, name: &str, parent: Option<&Namespace>) -> Namespace {
        self.store
            .create_namespace(name, parent.map(|p| p.id))
            .expect("create namespace")
    }

    pub fn project(&self, namespace: &Namespace, name: &str) -> Project {
        self.project_on(namespace, name, "default")
    }

    pub fn project_on(&self, namespace: &Namespace, name: &str, storage: &str) -> Project {
        self.store
            .create_project(&NewProject {
                namespace_id: namespace.id,
                name: name.to_string(),
                disk_path: format!("{}/{name}", namespace.name),
                repository_storage: storage.to_string(),
                wiki_enabled: false,
                last_repository_updated_at: Some(Utc::now()),
            })
            .expect("create project")
    }

    pub fn mark_synced(&self, node: &GeoNode, project: &Project) {
        self.store
            .record_sync_success(node.id, project.id, RepoKind::Repository, Utc::now())
            .expect("record success");
    }

    pub fn mark_failed(&self, node: &GeoNode, project: &Project) {
        self.store
            .record_sync_failure(node.id, project.id, RepoKind::Repository, "boom")
            .expect("record failure");
    }

    pub fn scheduler(
        &self,
        queue: Arc<JobQueue>,
        lease: Arc<dyn ExclusiveLease>,
        shards: Arc<dyn ShardHealth>,
        config: GeoConfig,
    ) -> RepositorySyncScheduler {
        RepositorySyncScheduler::new(self.dyn_store(), lease, shards, queue, Arc::new(config))
    }

    pub fn store_lease(&self) -> Arc<dyn ExclusiveLease> {
        Arc::new(StoreLease::new(self.dyn_store()))
    }

    pub fn sync_service(&self, mirror: Arc<dyn RepositoryMirror>) -> ProjectSyncService {
        ProjectSyncService::new(self.dyn_store(), mirror, GeoFeatures::default())
    }
}

/// Scheduler settings for tests: no pacing between batches.
pub fn test_config(batch_size: usize) -> GeoConfig {
    GeoConfig {
        db_retrieve_batch_size: batch_size,
        pacing_millis: 0,
        ..GeoConfig::default()
    }
}

/// Mirror that fails every fetch with a transport error.
#[derive(Default)]
pub struct FailingMirror {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RepositoryMirror for FailingMirror {
    async fn fetch(&self, _primary_url: &str, project: &Project, _kind: RepoKind) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Mirror(format!(
            "fetch of {} failed: connection reset by peer",
            project.disk_path
        )))
    }
}

/// Mirror that succeeds without transferring anything.
pub struct NoopMirror;

#[async_trait]
impl RepositoryMirror for NoopMirror {
    async fn fetch(&self, _primary_url: &str, _project: &Project, _kind: RepoKind) -> Result<()> {
        Ok(())
    }
}

/// Lease that is always held by someone else.
pub struct TakenLease;

impl ExclusiveLease for TakenLease {
    fn try_obtain(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Ok(false)
    }

    fn renew(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Ok(false)
    }

    fn cancel(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Fixed set of healthy storages.
pub struct Shards(pub Vec<&'static str>);

impl ShardHealth for Shards {
    fn healthy_storages(&self) -> Vec<String> {
        self.0.iter().map(|s| s.to_string()).collect()
    }
}

pub fn default_shards() -> Arc<dyn ShardHealth> {
    Arc::new(Shards(vec!["default"]))
}
