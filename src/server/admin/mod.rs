mod nodes;
mod queues;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // Geo node routes
        .route("/geo/nodes", post(nodes::create_node))
        .route("/geo/nodes", get(nodes::list_nodes))
        .route("/geo/nodes/{id}", get(nodes::get_node))
        .route("/geo/nodes/{id}", patch(nodes::update_node))
        .route("/geo/nodes/{id}", delete(nodes::delete_node))
        .route("/geo/nodes/{id}/status", get(nodes::node_status))
        // Queue routes
        .route("/queues/{name}/jobs", delete(queues::drop_jobs))
}
