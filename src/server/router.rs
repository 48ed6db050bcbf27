use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::geo::geo_router;
use crate::config::GeoConfig;
use crate::error::Result;
use crate::geo::{LocalHealthCheck, Queues, StatusAggregator};
use crate::store::Store;
use crate::types::GeoNode;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub geo: Arc<GeoConfig>,
    /// External URL identifying the node this installation runs as.
    pub node_url: String,
    pub status: StatusAggregator,
    pub queues: Queues,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, geo: Arc<GeoConfig>, node_url: impl Into<String>) -> Self {
        let node_url = node_url.into();
        let health = Arc::new(LocalHealthCheck::new(
            store.clone(),
            geo.clone(),
            node_url.clone(),
        ));
        let status = StatusAggregator::new(store.clone(), health, geo.features.clone());

        Self {
            store,
            geo,
            node_url,
            status,
            queues: Queues::new(),
        }
    }

    #[must_use]
    pub fn with_queues(mut self, queues: Queues) -> Self {
        self.queues = queues;
        self
    }

    pub fn current_node(&self) -> Result<Option<GeoNode>> {
        self.store.find_node_by_url(&self.node_url)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/admin", admin_router())
        .nest("/api/v1/geo", geo_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{NewNode, NodeRole};
    use tempfile::TempDir;

    fn app(node_url: &str) -> (TempDir, Arc<dyn Store>, Router) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("geosync.db")).unwrap();
        store.initialize().unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let state = Arc::new(AppState::new(
            store.clone(),
            Arc::new(GeoConfig::default()),
            node_url,
        ));
        (temp_dir, store, create_router(state))
    }

    #[tokio::test]
    async fn test_health_route() {
        let (_dir, _store, app) = app("http://geo-1/");
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_current_node_resolved_by_url() {
        let (_dir, store, app) = app("http://GEO-1");
        store
            .create_node(&NewNode::from_url("http://geo-1/", NodeRole::Primary).unwrap())
            .unwrap();

        let response = app
            .oneshot(Request::get("/api/v1/geo/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
