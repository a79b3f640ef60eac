// handlers/protected/whatsapp.rs - /whatsapp/inbox/* for the caller's own WhatsApp session
//
// Sessions are keyed by the authenticated user. Whether the session lives in
// this process or behind the worker is decided by the configured client.

use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::config;
use crate::database::models::ScheduledMessage;
use crate::error::ApiError;
use crate::middleware::{authorize, ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::services::schedule_service::ScheduleRequest;
use crate::state::AppState;
use crate::whatsapp::{Ack, ChatMessage, ChatSummary, Profile, SendResult, SessionStatus};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub phone: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitReadyRequest {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduledQuery {
    pub status: Option<String>,
}

/**
 * POST /whatsapp/inbox/initialize - Start (or reuse) the caller's session
 *
 * A fresh profile answers `{state: "qr_ready", qr_code: <base64 PNG>}`; a
 * profile that is already linked answers `{state: "ready", phone_number}`.
 */
pub async fn initialize(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<SessionStatus> {
    authorize(&state.policy, &auth, "whatsapp", "edit")?;
    Ok(ApiResponse::success(state.whatsapp.initialize(auth.id()).await?))
}

/// GET /whatsapp/inbox/status - Snapshot; never waits on an in-flight browser operation
pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<SessionStatus> {
    authorize(&state.policy, &auth, "whatsapp", "view")?;
    Ok(ApiResponse::success(state.whatsapp.status(auth.id()).await?))
}

/// POST /whatsapp/inbox/wait-ready - Block until the QR is scanned or the timeout passes
pub async fn wait_ready(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Option<ApiJson<WaitReadyRequest>>,
) -> ApiResult<SessionStatus> {
    authorize(&state.policy, &auth, "whatsapp", "view")?;
    let secs = body
        .and_then(|ApiJson(b)| b.timeout_secs)
        .unwrap_or(config::config().whatsapp.wait_ready_secs);
    let status = state.whatsapp.wait_ready(auth.id(), Duration::from_secs(secs)).await?;
    Ok(ApiResponse::success(status))
}

/// POST /whatsapp/inbox/send-message - A rejected number is `{success: false, error}`, not an HTTP error
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<SendMessageRequest>,
) -> ApiResult<SendResult> {
    authorize(&state.policy, &auth, "whatsapp", "edit")?;
    if request.message.trim().is_empty() {
        return Err(ApiError::invalid_field("message", "message is required"));
    }
    let result = state.whatsapp.send(auth.id(), &request.phone, &request.message).await?;
    Ok(ApiResponse::success(result))
}

/// POST /whatsapp/inbox/schedule-message - Queue a message for the dispatcher
pub async fn schedule_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<ScheduleRequest>,
) -> ApiResult<ScheduledMessage> {
    let clinic_id = authorize(&state.policy, &auth, "whatsapp", "edit")?;
    let message = state.services.schedules.schedule(clinic_id, auth.id(), request).await?;
    Ok(ApiResponse::created(message))
}

pub async fn list_scheduled(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ScheduledQuery>,
) -> ApiResult<Vec<ScheduledMessage>> {
    let clinic_id = authorize(&state.policy, &auth, "whatsapp", "view")?;
    let messages = state.services.schedules.list(clinic_id, query.status.as_deref()).await?;
    Ok(ApiResponse::success(messages))
}

/// DELETE /whatsapp/inbox/scheduled/:id - Only while still pending
pub async fn delete_scheduled(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let clinic_id = authorize(&state.policy, &auth, "whatsapp", "edit")?;
    state.services.schedules.delete(clinic_id, id).await?;
    Ok(ApiResponse::no_content())
}

pub async fn chats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<ChatSummary>> {
    authorize(&state.policy, &auth, "whatsapp", "view")?;
    Ok(ApiResponse::success(state.whatsapp.list_chats(auth.id()).await?))
}

pub async fn messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(phone): Path<String>,
) -> ApiResult<Vec<ChatMessage>> {
    authorize(&state.policy, &auth, "whatsapp", "view")?;
    Ok(ApiResponse::success(state.whatsapp.get_messages(auth.id(), &phone).await?))
}

pub async fn groups(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<ChatSummary>> {
    authorize(&state.policy, &auth, "whatsapp", "view")?;
    Ok(ApiResponse::success(state.whatsapp.list_groups(auth.id()).await?))
}

pub async fn profile(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Profile> {
    authorize(&state.policy, &auth, "whatsapp", "view")?;
    Ok(ApiResponse::success(state.whatsapp.profile(auth.id()).await?))
}

/// POST /whatsapp/inbox/disconnect - Closes the browser; the profile stays linked on disk
pub async fn disconnect(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Ack> {
    authorize(&state.policy, &auth, "whatsapp", "edit")?;
    Ok(ApiResponse::success(state.whatsapp.disconnect(auth.id()).await?))
}
