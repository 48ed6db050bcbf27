use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::server::AppState;
use crate::server::dto::{NodeResponse, UpdateNodeRequest};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::NewNode;

pub async fn create_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewNode>,
) -> impl IntoResponse {
    validate_node(&req.schema, &req.host)?;

    let node = state
        .store
        .create_node(&req)
        .api_err("Failed to create node")?;

    tracing::info!("Registered {} node {} at {}", node.role, node.id, node.url());

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(NodeResponse::new(node, &state.node_url))),
    ))
}

pub async fn list_nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let nodes = state.store.list_nodes().api_err("Failed to list nodes")?;

    let nodes: Vec<NodeResponse> = nodes
        .into_iter()
        .map(|node| NodeResponse::new(node, &state.node_url))
        .collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(nodes)))
}

pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let node = state
        .store
        .get_node(id)
        .api_err("Failed to get node")?
        .or_not_found("Node not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(NodeResponse::new(
        node,
        &state.node_url,
    ))))
}

pub async fn update_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateNodeRequest>,
) -> impl IntoResponse {
    let mut node = state
        .store
        .get_node(id)
        .api_err("Failed to get node")?
        .or_not_found("Node not found")?;

    req.apply(&mut node);

    state
        .store
        .update_node(&node)
        .api_err("Failed to update node")?;

    let node = state
        .store
        .get_node(id)
        .api_err("Failed to get node")?
        .or_not_found("Node not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(NodeResponse::new(
        node,
        &state.node_url,
    ))))
}

pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let deleted = state
        .store
        .delete_node(id)
        .api_err("Failed to delete node")?;

    if !deleted {
        return Err(ApiError::not_found("Node not found"));
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Status snapshot of any registered node, computed from this installation's view.
pub async fn node_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let node = state
        .store
        .get_node(id)
        .api_err("Failed to get node")?
        .or_not_found("Node not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(state.status.compute(&node))))
}

fn validate_node(schema: &str, host: &str) -> Result<(), ApiError> {
    if schema != "http" && schema != "https" {
        return Err(ApiError::bad_request("Schema must be http or https"));
    }

    if host.is_empty() || host.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(ApiError::bad_request("Host must be a bare host name"));
    }

    Ok(())
}
