use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::geo::append_event;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::NewEvent;

pub fn geo_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(current_status))
        .route("/events", post(create_event))
}

/// Status of the node this installation runs as, as flat JSON.
pub async fn current_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let node = state
        .current_node()
        .api_err("Failed to look up current node")?
        .or_not_found("This installation is not registered as a Geo node")?;

    Ok::<_, ApiError>(Json(state.status.compute(&node)))
}

pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewEvent>,
) -> impl IntoResponse {
    let node = state
        .current_node()
        .api_err("Failed to look up current node")?
        .or_not_found("This installation is not registered as a Geo node")?;

    let entry = append_event(state.store.as_ref(), &node, &req).api_err("Failed to append event")?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(entry)),
    ))
}
