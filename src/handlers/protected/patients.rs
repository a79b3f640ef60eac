// handlers/protected/patients.rs - /patients CRUD

use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::models::{Patient, Report};
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::services::patient_service::{CreatedPatient, NewPatient};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PatientQuery {
    /// Substring match on name or phone
    pub search: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<PatientQuery>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Patient>> {
    let clinic_id = authorize(&state.policy, &auth, "patients", "view")?;
    let patients = state
        .services
        .patients
        .list(clinic_id, query.search.as_deref(), page.offset, page.limit)
        .await?;
    Ok(ApiResponse::success(patients))
}

/// GET /patients/:id - A patient of another clinic is reported as missing
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Patient> {
    let clinic_id = authorize(&state.policy, &auth, "patients", "view")?;
    Ok(ApiResponse::success(state.services.patients.get(clinic_id, id).await?))
}

/**
 * POST /patients - Register a patient
 *
 * Phone is unique within the clinic only. When the treatment type matches an
 * active priced catalog entry, a draft invoice with one line item is created
 * in the same transaction and returned alongside the patient.
 */
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewPatient>,
) -> ApiResult<CreatedPatient> {
    let clinic_id = authorize(&state.policy, &auth, "patients", "edit")?;
    let created = state.services.patients.create(clinic_id, auth.id(), input).await?;
    Ok(ApiResponse::created(created))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<Patient> {
    let clinic_id = authorize(&state.policy, &auth, "patients", "edit")?;
    Ok(ApiResponse::success(state.services.patients.update(clinic_id, id, fields).await?))
}

/// DELETE /patients/:id - Refused with 409 while payments or reports reference the patient
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "patients", "delete")?;
    state.services.patients.delete(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}

/// GET /patients/:id/reports
pub async fn reports(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Report>> {
    let clinic_id = authorize(&state.policy, &auth, "patients", "view")?;
    Ok(ApiResponse::success(state.services.patients.reports(clinic_id, id).await?))
}
