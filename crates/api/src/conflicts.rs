use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use boxsync_core::protocol::{
    ConflictListResponse, ConflictRecord, ConflictResolution, ResolveRequest,
};

use crate::error::{storage_error, HttpFailure};
use crate::ApiState;

#[derive(Debug, serde::Serialize)]
struct ResolveResponse {
    success: bool,
    message: String,
    conflict: ConflictRecord,
}

pub(crate) async fn list_conflicts(State(state): State<ApiState>) -> Response {
    match state.stores().metadata.get_conflicts().await {
        Ok(conflicts) => Json(ConflictListResponse {
            success: true,
            conflicts,
        })
        .into_response(),
        Err(error) => storage_error(error),
    }
}

pub(crate) async fn resolve_conflict(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Response {
    if request.method.is_empty() {
        return HttpFailure::bad_request("method is required").into_response();
    }
    if request.client_id.is_empty() {
        return HttpFailure::bad_request("client_id is required").into_response();
    }

    let resolution = ConflictResolution {
        method: request.method,
        keep_version: request.keep_version,
        client_id: request.client_id,
    };
    match state
        .stores()
        .metadata
        .resolve_conflict(&id, resolution)
        .await
    {
        Ok(conflict) => Json(ResolveResponse {
            success: true,
            message: format!("Conflict {id} resolved"),
            conflict,
        })
        .into_response(),
        Err(error) => storage_error(error),
    }
}
