// handlers/protected/clinic_users.rs - /clinic-users staff management

use axum::extract::{Extension, Path, Query, State};
use uuid::Uuid;

use crate::database::models::User;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::services::clinic_user_service::{ClinicUserUpdate, NewClinicUser};
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<User>> {
    let clinic_id = authorize(&state.policy, &auth, "users", "view")?;
    let users = state.services.clinic_users.list(clinic_id, page.offset, page.limit).await?;
    Ok(ApiResponse::success(users))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    let clinic_id = authorize(&state.policy, &auth, "users", "view")?;
    Ok(ApiResponse::success(state.services.clinic_users.get(clinic_id, id).await?))
}

/// POST /clinic-users - Add a doctor or receptionist with an initial password
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewClinicUser>,
) -> ApiResult<User> {
    let clinic_id = authorize(&state.policy, &auth, "users", "edit")?;
    let user = state.services.clinic_users.create(clinic_id, auth.id(), input).await?;
    Ok(ApiResponse::created(user))
}

/// PUT /clinic-users/:id - Names, activation, and role (swapped atomically in the policy store)
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(update): ApiJson<ClinicUserUpdate>,
) -> ApiResult<User> {
    let clinic_id = authorize(&state.policy, &auth, "users", "edit")?;
    let user = state.services.clinic_users.update(clinic_id, auth.id(), id, update).await?;
    Ok(ApiResponse::success(user))
}

/// DELETE /clinic-users/:id - Deactivates; the row stays for attribution
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    let clinic_id = authorize(&state.policy, &auth, "users", "delete")?;
    let user = state.services.clinic_users.deactivate(clinic_id, auth.id(), id).await?;
    Ok(ApiResponse::success(user))
}
