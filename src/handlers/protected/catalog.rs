// handlers/protected/catalog.rs - /treatment-types and /referring-doctors

use axum::extract::{Extension, Path, Query, State};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::models::{ReferringDoctor, TreatmentType};
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::state::AppState;

pub async fn list_treatment_types(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<TreatmentType>> {
    let clinic_id = authorize(&state.policy, &auth, "treatments", "view")?;
    let types = state.services.catalog.list_treatment_types(clinic_id, page.offset, page.limit).await?;
    Ok(ApiResponse::success(types))
}

pub async fn get_treatment_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<TreatmentType> {
    let clinic_id = authorize(&state.policy, &auth, "treatments", "view")?;
    Ok(ApiResponse::success(state.services.catalog.get_treatment_type(clinic_id, id).await?))
}

pub async fn create_treatment_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<TreatmentType> {
    let clinic_id = authorize(&state.policy, &auth, "treatments", "edit")?;
    Ok(ApiResponse::created(state.services.catalog.create_treatment_type(clinic_id, fields).await?))
}

pub async fn update_treatment_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<TreatmentType> {
    let clinic_id = authorize(&state.policy, &auth, "treatments", "edit")?;
    Ok(ApiResponse::success(state.services.catalog.update_treatment_type(clinic_id, id, fields).await?))
}

pub async fn delete_treatment_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "treatments", "delete")?;
    state.services.catalog.delete_treatment_type(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}

pub async fn list_referring_doctors(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<ReferringDoctor>> {
    let clinic_id = authorize(&state.policy, &auth, "doctors", "view")?;
    let doctors = state.services.catalog.list_referring_doctors(clinic_id, page.offset, page.limit).await?;
    Ok(ApiResponse::success(doctors))
}

pub async fn get_referring_doctor(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ReferringDoctor> {
    let clinic_id = authorize(&state.policy, &auth, "doctors", "view")?;
    Ok(ApiResponse::success(state.services.catalog.get_referring_doctor(clinic_id, id).await?))
}

pub async fn create_referring_doctor(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<ReferringDoctor> {
    let clinic_id = authorize(&state.policy, &auth, "doctors", "edit")?;
    Ok(ApiResponse::created(state.services.catalog.create_referring_doctor(clinic_id, fields).await?))
}

pub async fn update_referring_doctor(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<ReferringDoctor> {
    let clinic_id = authorize(&state.policy, &auth, "doctors", "edit")?;
    Ok(ApiResponse::success(state.services.catalog.update_referring_doctor(clinic_id, id, fields).await?))
}

pub async fn delete_referring_doctor(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "doctors", "delete")?;
    state.services.catalog.delete_referring_doctor(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}
