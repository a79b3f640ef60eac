// handlers/protected/clinics.rs - POST /clinics, GET|PUT /clinics/me, DELETE /clinics/:id

use axum::extract::{Extension, Path, State};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::models::{Clinic, User};
use crate::error::ApiError;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::services::clinic_service::NewClinic;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Onboarded {
    pub clinic: Clinic,
    pub user: User,
}

/**
 * POST /clinics - Onboard a clinic
 *
 * The caller becomes its `clinic_owner`. Name is unique across clinics, and
 * so is the GST number when one is given. Callers already attached to a
 * clinic are refused.
 */
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewClinic>,
) -> ApiResult<Onboarded> {
    let (clinic, user) = state.services.clinics.onboard(&auth.0, input).await?;
    Ok(ApiResponse::created(Onboarded { clinic, user }))
}

/// GET /clinics/me
pub async fn me(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Clinic> {
    let clinic_id = auth.clinic_id()?;
    Ok(ApiResponse::success(state.services.clinics.get(clinic_id).await?))
}

/// PUT /clinics/me - Partial update of profile, branding, timings and location
pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<Clinic> {
    let clinic_id = authorize(&state.policy, &auth, "clinic", "edit")?;
    Ok(ApiResponse::success(state.services.clinics.update(clinic_id, fields).await?))
}

/// DELETE /clinics/:id - Only the caller's own clinic, and only once no active owner remains
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "clinic", "delete")?;
    if id != clinic_id {
        return Err(ApiError::not_found("Clinic not found"));
    }
    state.services.clinics.delete(clinic_id).await?;
    Ok(ApiResponse::no_content())
}
