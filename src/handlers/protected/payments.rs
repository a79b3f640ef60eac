// handlers/protected/payments.rs - /payments CRUD

use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::models::Payment;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PaymentQuery {
    pub patient_id: Option<Uuid>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<PaymentQuery>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Payment>> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "view")?;
    let payments = state
        .services
        .payments
        .list(clinic_id, query.patient_id, page.offset, page.limit)
        .await?;
    Ok(ApiResponse::success(payments))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Payment> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "view")?;
    Ok(ApiResponse::success(state.services.payments.get(clinic_id, id).await?))
}

/// POST /payments - Method and status are validated; transaction_id is unique per clinic
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<Payment> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    let payment = state.services.payments.create(clinic_id, auth.id(), fields).await?;
    Ok(ApiResponse::created(payment))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> ApiResult<Payment> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    Ok(ApiResponse::success(state.services.payments.update(clinic_id, id, fields).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "delete")?;
    state.services.payments.delete(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}
