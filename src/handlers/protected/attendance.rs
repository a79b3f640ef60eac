// handlers/protected/attendance.rs - geofenced clock-in/out and attendance views

use axum::extract::{Extension, Query, State};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::database::models::Attendance;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::services::attendance_service::GeoCapture;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_days")]
    pub limit: i64,
}

fn default_days() -> i64 {
    30
}

#[derive(Debug, Default, Deserialize)]
pub struct DayQuery {
    pub date: Option<NaiveDate>,
}

/**
 * POST /attendance/clock-in
 *
 * Input: `{latitude, longitude, accuracy?, address?}`. Outside the clinic's
 * radius is 403 GEOFENCE_VIOLATION; a second clock-in on the same day is 409
 * ALREADY_CLOCKED_IN. Clinics without a recorded location skip the fence.
 */
pub async fn clock_in(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(at): ApiJson<GeoCapture>,
) -> ApiResult<Attendance> {
    let clinic_id = authorize(&state.policy, &auth, "attendance", "edit")?;
    Ok(ApiResponse::created(state.services.attendance.clock_in(clinic_id, auth.id(), at).await?))
}

/// POST /attendance/clock-out - Closes today's record and computes hours worked
pub async fn clock_out(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(at): ApiJson<GeoCapture>,
) -> ApiResult<Attendance> {
    let clinic_id = authorize(&state.policy, &auth, "attendance", "edit")?;
    Ok(ApiResponse::success(state.services.attendance.clock_out(clinic_id, auth.id(), at).await?))
}

/// GET /attendance/status - Today's record for the caller, if any
pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Option<Attendance>> {
    auth.clinic_id()?;
    Ok(ApiResponse::success(state.services.attendance.status(auth.id()).await?))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Attendance>> {
    auth.clinic_id()?;
    Ok(ApiResponse::success(state.services.attendance.history(auth.id(), query.limit).await?))
}

/// GET /attendance - Everyone's records for one day (today by default)
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<DayQuery>,
) -> ApiResult<Vec<Attendance>> {
    let clinic_id = authorize(&state.policy, &auth, "attendance", "view")?;
    Ok(ApiResponse::success(state.services.attendance.list(clinic_id, query.date).await?))
}
