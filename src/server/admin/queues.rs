use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

const DEFAULT_DROP_TIMEOUT: Duration = Duration::from_secs(30);

/// `DELETE /queues/{name}/jobs?project=1&timeout=10` drops matching pending jobs.
pub async fn drop_jobs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(mut metadata): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let timeout = match metadata.remove("timeout") {
        Some(secs) => secs
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ApiError::bad_request("timeout must be a number of seconds"))?,
        None => DEFAULT_DROP_TIMEOUT,
    };

    let result = state
        .queues
        .drop_jobs(&name, &metadata, timeout)
        .api_err("Failed to drop jobs")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(result)))
}
