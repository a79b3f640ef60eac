// handlers/protected/permissions.rs - /permissions/* role and grant management

use axum::extract::{Extension, Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::authz::{ACTIONS, RESOURCES};
use crate::database::models::Role;
use crate::error::ApiError;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::services::clinic_user_service::ClinicUserUpdate;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UserPermissions {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub resource: String,
    pub action: String,
}

fn permissions_of(state: &AppState, user_id: Uuid, clinic_id: Uuid) -> UserPermissions {
    let (user, clinic) = (user_id.to_string(), clinic_id.to_string());
    UserPermissions {
        user_id,
        clinic_id,
        roles: state.policy.roles_for(&user, &clinic),
        permissions: state.policy.list_permissions(&user, &clinic),
    }
}

/// GET /permissions/roles - Default grants per role
pub async fn roles(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    authorize(&state.policy, &auth, "permissions", "view")?;
    Ok(ApiResponse::success(json!(state.policy.role_grants())))
}

/// GET /permissions/resources - The resource and action vocabulary
pub async fn resources(Extension(_auth): Extension<AuthUser>) -> ApiResult<Value> {
    let roles: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
    Ok(ApiResponse::success(json!({
        "resources": RESOURCES,
        "actions": ACTIONS,
        "roles": roles,
    })))
}

/// GET /permissions/users/:id - Roles and effective permissions of a clinic member
pub async fn user_permissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<UserPermissions> {
    let clinic_id = if user_id == auth.id() {
        auth.clinic_id()?
    } else {
        authorize(&state.policy, &auth, "permissions", "view")?
    };
    state.services.clinic_users.get(clinic_id, user_id).await?;
    Ok(ApiResponse::success(permissions_of(&state, user_id, clinic_id)))
}

/// POST /permissions/users/:id/role - Replace the member's role (policy and user row together)
pub async fn assign_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    ApiJson(request): ApiJson<RoleRequest>,
) -> ApiResult<UserPermissions> {
    let clinic_id = authorize(&state.policy, &auth, "permissions", "edit")?;
    let role: Role = request
        .role
        .parse()
        .map_err(|r| ApiError::invalid_field("role", format!("Unknown role '{}'", r)))?;

    let update = ClinicUserUpdate { role: Some(role.as_str().to_string()), ..Default::default() };
    state.services.clinic_users.update(clinic_id, auth.id(), user_id, update).await?;
    Ok(ApiResponse::success(permissions_of(&state, user_id, clinic_id)))
}

/// POST /permissions/users/:id/grants - Add a direct `resource:action` grant
pub async fn add_grant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    ApiJson(request): ApiJson<GrantRequest>,
) -> ApiResult<UserPermissions> {
    let clinic_id = authorize(&state.policy, &auth, "permissions", "edit")?;
    state.services.clinic_users.get(clinic_id, user_id).await?;
    state
        .policy
        .grant(&user_id.to_string(), &clinic_id.to_string(), &request.resource, &request.action)
        .await?;
    Ok(ApiResponse::success(permissions_of(&state, user_id, clinic_id)))
}

/// DELETE /permissions/users/:id/grants - Remove a direct grant; role grants are untouched
pub async fn remove_grant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    ApiJson(request): ApiJson<GrantRequest>,
) -> ApiResult<UserPermissions> {
    let clinic_id = authorize(&state.policy, &auth, "permissions", "edit")?;
    state.services.clinic_users.get(clinic_id, user_id).await?;
    state
        .policy
        .revoke_grant(&user_id.to_string(), &clinic_id.to_string(), &request.resource, &request.action)
        .await?;
    Ok(ApiResponse::success(permissions_of(&state, user_id, clinic_id)))
}

/// POST /permissions/reload - Re-read the policy store
pub async fn reload(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    authorize(&state.policy, &auth, "permissions", "edit")?;
    let rules = state.policy.reload().await?;
    Ok(ApiResponse::success(json!({ "rules": rules })))
}
