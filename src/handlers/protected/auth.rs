// handlers/protected/auth.rs - GET /auth/me, POST /auth/change-password

use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::models::{Clinic, User};
use crate::middleware::{ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Me {
    pub user: User,
    pub clinic: Option<Clinic>,
    pub permissions: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: String,
}

/// GET /auth/me - Current user, their clinic and effective permissions in it
pub async fn me(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Me> {
    let AuthUser(user) = auth;

    let (clinic, permissions) = match user.clinic_id {
        Some(clinic_id) => {
            let clinic = state.services.clinics.get(clinic_id).await?;
            let permissions = state
                .policy
                .list_permissions(&user.id.to_string(), &clinic_id.to_string());
            (Some(clinic), json!(permissions))
        }
        None => (None, user.permissions.clone()),
    };

    Ok(ApiResponse::success(Me { user, clinic, permissions }))
}

/// POST /auth/change-password - `current_password` may be omitted only on accounts without one
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Value> {
    state
        .auth
        .change_password(auth.id(), request.current_password.as_deref(), &request.new_password)
        .await?;
    Ok(ApiResponse::success(json!({ "message": "Password updated" })))
}
