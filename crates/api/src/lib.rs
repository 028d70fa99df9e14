#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use boxsync_core::protocol::HealthResponse;
use boxsync_core::validation::MAX_FILE_SIZE;
use boxsync_storage::SharedStores;

mod conflicts;
mod error;
mod files;

/// Room for multipart framing around a maximum-size file.
const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE as usize + 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    stores: Arc<SharedStores>,
    started_at: Instant,
}

impl ApiState {
    #[must_use]
    pub fn new(stores: Arc<SharedStores>) -> Self {
        Self {
            stores,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn stores(&self) -> &SharedStores {
        &self.stores
    }

    pub(crate) fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files", get(files::list_files))
        .route("/files/upload-safe", post(files::upload_safe))
        .route("/files/chunk", post(files::upload_chunk))
        .route("/files/{name}/download", get(files::download_current))
        .route("/files/{name}/versions", get(files::list_versions))
        .route(
            "/files/{name}/versions/{version}/download",
            get(files::download_version),
        )
        .route("/files/{name}/restore/{version}", post(files::restore_version))
        .route("/files/{name}/rename", post(files::rename_file))
        .route("/files/{name}", delete(files::delete_file))
        .route("/conflicts", get(conflicts::list_conflicts))
        .route("/conflicts/{id}/resolve", post(conflicts::resolve_conflict))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(state)
}

/// Must answer 200 even in degraded state; the supervisor uses the first
/// success to mark a worker healthy.
async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
