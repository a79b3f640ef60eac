// handlers/protected/devices.rs - /devices registry endpoints

use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::UserDevice;
use crate::devices::DeviceUpdate;
use crate::error::ApiError;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub device_serial: String,
}

/// GET /devices - Every device registered by the clinic's staff
pub async fn list(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<UserDevice>> {
    let clinic_id = authorize(&state.policy, &auth, "devices", "view")?;
    Ok(ApiResponse::success(state.devices.list(clinic_id).await?))
}

/// GET /devices/me - The caller's own devices
pub async fn mine(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<UserDevice>> {
    Ok(ApiResponse::success(state.devices.list_for_user(auth.id()).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<UserDevice> {
    let clinic_id = authorize(&state.policy, &auth, "devices", "view")?;
    Ok(ApiResponse::success(state.devices.get(clinic_id, id).await?))
}

/// PUT /devices/:id - Rename, toggle, or change `allowed_access`
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(update): ApiJson<DeviceUpdate>,
) -> ApiResult<UserDevice> {
    let clinic_id = authorize(&state.policy, &auth, "devices", "edit")?;
    Ok(ApiResponse::success(state.devices.update(clinic_id, id, update).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "devices", "delete")?;
    state.devices.delete(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}

/// POST /devices/heartbeat - Refresh `last_seen` on one of the caller's devices
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<HeartbeatRequest>,
) -> ApiResult<UserDevice> {
    if request.device_serial.trim().is_empty() {
        return Err(ApiError::invalid_field("device_serial", "device_serial is required"));
    }
    Ok(ApiResponse::success(state.devices.heartbeat(auth.id(), &request.device_serial).await?))
}
