// handlers/protected/templates.rs - /templates CRUD and rendering

use axum::extract::{Extension, Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::models::MessageTemplate;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub values: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Rendered {
    pub template_id: Uuid,
    pub content: String,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<MessageTemplate>> {
    let clinic_id = authorize(&state.policy, &auth, "templates", "view")?;
    Ok(ApiResponse::success(state.services.templates.list(clinic_id, page.offset, page.limit).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<MessageTemplate> {
    let clinic_id = authorize(&state.policy, &auth, "templates", "view")?;
    Ok(ApiResponse::success(state.services.templates.get(clinic_id, id).await?))
}

/// POST /templates - `variables` is derived from the `{var}` / `{{var}}` placeholders in `content`
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<MessageTemplate> {
    let clinic_id = authorize(&state.policy, &auth, "templates", "edit")?;
    Ok(ApiResponse::created(state.services.templates.create(clinic_id, fields).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<MessageTemplate> {
    let clinic_id = authorize(&state.policy, &auth, "templates", "edit")?;
    Ok(ApiResponse::success(state.services.templates.update(clinic_id, id, fields).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "templates", "delete")?;
    state.services.templates.delete(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}

/// POST /templates/:id/render - Placeholders without a value are left as written
pub async fn render(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<ApiJson<RenderRequest>>,
) -> ApiResult<Rendered> {
    let clinic_id = authorize(&state.policy, &auth, "templates", "view")?;
    let ApiJson(request) = body.unwrap_or_default();
    let content = state.services.templates.render(clinic_id, id, &request.values).await?;
    Ok(ApiResponse::success(Rendered { template_id: id, content }))
}
