// handlers/protected/sync.rs - POST /sync/run, GET /sync/status, POST /sync/table/:name

use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use std::sync::Arc;

use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;
use crate::sync::{SyncEngine, SyncError, SyncOptions, SyncReport, TableStatus};

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub full: bool,
}

fn engine(state: &AppState) -> Result<&Arc<SyncEngine>, SyncError> {
    state.sync.as_ref().ok_or(SyncError::CloudNotConfigured)
}

/// POST /sync/run - One reconcile cycle for the caller's clinic, optionally limited to some tables
pub async fn run(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Option<ApiJson<RunRequest>>,
) -> ApiResult<SyncReport> {
    let clinic_id = authorize(&state.policy, &auth, "sync", "edit")?;
    let ApiJson(request) = body.unwrap_or_default();
    let options = SyncOptions { tables: request.tables, full: request.full };
    let report = engine(&state)?.run(clinic_id, options).await?;
    Ok(ApiResponse::success(report))
}

/// GET /sync/status - Watermark and pending row count per table
pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<TableStatus>> {
    let clinic_id = authorize(&state.policy, &auth, "sync", "view")?;
    Ok(ApiResponse::success(engine(&state)?.status(clinic_id).await?))
}

/// POST /sync/table/:name - Reconcile a single table
pub async fn table(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(name): Path<String>,
    body: Option<ApiJson<RunRequest>>,
) -> ApiResult<SyncReport> {
    let clinic_id = authorize(&state.policy, &auth, "sync", "edit")?;
    let full = body.map(|ApiJson(r)| r.full).unwrap_or(false);
    let options = SyncOptions { tables: Some(vec![name]), full };
    let report = engine(&state)?.run(clinic_id, options).await?;
    Ok(ApiResponse::success(report))
}
