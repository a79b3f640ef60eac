// handlers/protected/invoices.rs - /invoices, line items, status transitions and audit trail

use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::{Invoice, InvoiceAuditLog};
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser, Pagination};
use crate::services::invoice_service::{
    InvoiceUpdate, InvoiceWithItems, LineItemUpdate, MarkPaid, NewInvoice, NewLineItem,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub status: Option<String>,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct NumberQuery {
    pub number: String,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<InvoiceQuery>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<Invoice>> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "view")?;
    let invoices = state
        .services
        .invoices
        .list(clinic_id, query.status.as_deref(), query.patient_id, page.offset, page.limit)
        .await?;
    Ok(ApiResponse::success(invoices))
}

/// GET /invoices/by-number?number=INV-2024-0001
pub async fn by_number(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<NumberQuery>,
) -> ApiResult<InvoiceWithItems> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "view")?;
    Ok(ApiResponse::success(state.services.invoices.find_by_number(clinic_id, &query.number).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<InvoiceWithItems> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "view")?;
    Ok(ApiResponse::success(state.services.invoices.get(clinic_id, id).await?))
}

/// POST /invoices - New draft; the number comes from the clinic's yearly counter
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewInvoice>,
) -> ApiResult<InvoiceWithItems> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    let invoice = state.services.invoices.create(clinic_id, auth.id(), input).await?;
    Ok(ApiResponse::created(invoice))
}

/// PUT /invoices/:id - Tax and notes, drafts only
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(update): ApiJson<InvoiceUpdate>,
) -> ApiResult<Invoice> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    Ok(ApiResponse::success(state.services.invoices.update(clinic_id, auth.id(), id, update).await?))
}

pub async fn add_line_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(item): ApiJson<NewLineItem>,
) -> ApiResult<InvoiceWithItems> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    let invoice = state.services.invoices.add_line_item(clinic_id, auth.id(), id, item).await?;
    Ok(ApiResponse::created(invoice))
}

pub async fn update_line_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    ApiJson(update): ApiJson<LineItemUpdate>,
) -> ApiResult<InvoiceWithItems> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    let invoice = state
        .services
        .invoices
        .update_line_item(clinic_id, auth.id(), id, item_id, update)
        .await?;
    Ok(ApiResponse::success(invoice))
}

pub async fn delete_line_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<InvoiceWithItems> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    let invoice = state.services.invoices.delete_line_item(clinic_id, auth.id(), id, item_id).await?;
    Ok(ApiResponse::success(invoice))
}

/// POST /invoices/:id/mark-as-paid - draft -> paid_unverified
pub async fn mark_as_paid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    ApiJson(payment): ApiJson<MarkPaid>,
) -> ApiResult<Invoice> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    Ok(ApiResponse::success(state.services.invoices.mark_as_paid(clinic_id, auth.id(), id, payment).await?))
}

/// POST /invoices/:id/verify - paid_unverified -> paid_verified
pub async fn verify(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Invoice> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    Ok(ApiResponse::success(state.services.invoices.verify(clinic_id, auth.id(), id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Invoice> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "edit")?;
    Ok(ApiResponse::success(state.services.invoices.cancel(clinic_id, auth.id(), id).await?))
}

pub async fn audit_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<InvoiceAuditLog>> {
    let clinic_id = authorize(&state.policy, &auth, "billing", "view")?;
    Ok(ApiResponse::success(state.services.invoices.audit_logs(clinic_id, id).await?))
}
