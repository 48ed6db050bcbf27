use std::sync::Arc;

use geosync::config::GeoConfig;
use geosync::geo::{Job, JobQueue, Queues, REPOSITORY_SYNC_QUEUE};
use geosync::server::{AppState, create_router};
use geosync::store::{SqliteStore, Store};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Serves the router in-process on an ephemeral port.
pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub store: Arc<dyn Store>,
    pub queue: Arc<JobQueue>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// `node_url` identifies the installation; register a node with the same
    /// URL to make it the current node.
    pub async fn start(node_url: &str) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::new(temp_dir.path().join("geosync.db")).expect("open store");
        store.initialize().expect("initialize schema");
        let store: Arc<dyn Store> = Arc::new(store);

        let queue = Arc::new(JobQueue::new(REPOSITORY_SYNC_QUEUE));
        let mut queues = Queues::new();
        queues.register(queue.clone());

        let state = Arc::new(
            AppState::new(store.clone(), Arc::new(GeoConfig::default()), node_url)
                .with_queues(queues),
        );
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self {
            temp_dir,
            base_url: format!("http://127.0.0.1:{port}"),
            store,
            queue,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn enqueue(&self, project_id: i64, node_id: i64) {
        assert!(self.queue.push(Job::new(project_id, node_id)));
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
