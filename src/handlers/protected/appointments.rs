// handlers/protected/appointments.rs - /appointments CRUD

use axum::extract::{Extension, Path, Query, State};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::models::Appointment;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    pub date: Option<NaiveDate>,
    pub status: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<AppointmentQuery>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Appointment>> {
    let clinic_id = authorize(&state.policy, &auth, "appointments", "view")?;
    let appointments = state
        .services
        .appointments
        .list(clinic_id, query.date, query.status.as_deref(), page.offset, page.limit)
        .await?;
    Ok(ApiResponse::success(appointments))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Appointment> {
    let clinic_id = authorize(&state.policy, &auth, "appointments", "view")?;
    Ok(ApiResponse::success(state.services.appointments.get(clinic_id, id).await?))
}

/// POST /appointments - Visit number is assigned per patient; walk-ins need a display name
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<Appointment> {
    let clinic_id = authorize(&state.policy, &auth, "appointments", "edit")?;
    let appointment = state.services.appointments.create(clinic_id, auth.id(), fields).await?;
    Ok(ApiResponse::created(appointment))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<Appointment> {
    let clinic_id = authorize(&state.policy, &auth, "appointments", "edit")?;
    Ok(ApiResponse::success(state.services.appointments.update(clinic_id, id, fields).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "appointments", "delete")?;
    state.services.appointments.delete(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}
