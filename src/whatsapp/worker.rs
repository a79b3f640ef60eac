// whatsapp/worker.rs - HTTP surface of the standalone WhatsApp worker (`clinic worker`)
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{Ack, ChatMessage, ChatSummary, Profile, SendResult, SessionManager, SessionStatus, WhatsAppError};
use crate::error::ApiError;

#[derive(Clone)]
struct WorkerState {
    manager: Arc<SessionManager>,
    token: Option<Arc<str>>,
}

/// Worker failures keep the API error envelope and add the session state when relevant
struct WorkerError(WhatsAppError);

impl From<WhatsAppError> for WorkerError {
    fn from(err: WhatsAppError) -> Self {
        WorkerError(err)
    }
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let state = match &self.0 {
            WhatsAppError::NotReady(state) => Some(*state),
            _ => None,
        };
        let api: ApiError = self.0.into();
        let mut body = api.to_json();
        if let Some(state) = state {
            body["state"] = json!(state);
        }
        let status = StatusCode::from_u16(api.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

type WorkerResult<T> = Result<Json<T>, WorkerError>;

pub fn router(manager: Arc<SessionManager>, token: Option<String>) -> Router {
    let state = WorkerState {
        manager,
        token: token.filter(|t| !t.is_empty()).map(Arc::from),
    };

    let api = Router::new()
        .route("/initialize/:user_id", post(initialize))
        .route("/status/:user_id", get(status))
        .route("/wait-ready/:user_id", post(wait_ready))
        .route("/send/:user_id", post(send))
        .route("/chats/:user_id", get(chats))
        .route("/messages/:user_id/:phone", get(messages))
        .route("/groups/:user_id", get(groups))
        .route("/profile/:user_id", get(profile))
        .route("/disconnect/:user_id", post(disconnect))
        .layer(middleware::from_fn_with_state(state.clone(), require_worker_token));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

async fn require_worker_token(
    State(state): State<WorkerState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.token {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_ref()) {
            return ApiError::unauthorized("Invalid worker token").into_response();
        }
    }
    next.run(request).await
}

async fn health(State(state): State<WorkerState>) -> Json<Value> {
    Json(json!({ "status": "ok", "sessions": state.manager.live_sessions() }))
}

async fn initialize(State(state): State<WorkerState>, Path(user_id): Path<Uuid>) -> WorkerResult<SessionStatus> {
    Ok(Json(state.manager.initialize(user_id).await?))
}

async fn status(State(state): State<WorkerState>, Path(user_id): Path<Uuid>) -> Json<SessionStatus> {
    Json(state.manager.status(user_id))
}

#[derive(Debug, Default, Deserialize)]
struct WaitReadyRequest {
    timeout_secs: Option<u64>,
}

async fn wait_ready(
    State(state): State<WorkerState>,
    Path(user_id): Path<Uuid>,
    body: Option<Json<WaitReadyRequest>>,
) -> WorkerResult<SessionStatus> {
    let timeout = body
        .and_then(|Json(b)| b.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(state.manager.settings().wait_ready);
    Ok(Json(state.manager.wait_ready(user_id, timeout).await?))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    phone: String,
    message: String,
}

async fn send(
    State(state): State<WorkerState>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SendRequest>,
) -> WorkerResult<SendResult> {
    Ok(Json(state.manager.send(user_id, &body.phone, &body.message).await?))
}

async fn chats(State(state): State<WorkerState>, Path(user_id): Path<Uuid>) -> WorkerResult<Vec<ChatSummary>> {
    Ok(Json(state.manager.list_chats(user_id).await?))
}

async fn messages(
    State(state): State<WorkerState>,
    Path((user_id, phone)): Path<(Uuid, String)>,
) -> WorkerResult<Vec<ChatMessage>> {
    Ok(Json(state.manager.get_messages(user_id, &phone).await?))
}

async fn groups(State(state): State<WorkerState>, Path(user_id): Path<Uuid>) -> WorkerResult<Vec<ChatSummary>> {
    Ok(Json(state.manager.list_groups(user_id).await?))
}

async fn profile(State(state): State<WorkerState>, Path(user_id): Path<Uuid>) -> Json<Profile> {
    Json(state.manager.profile(user_id))
}

async fn disconnect(State(state): State<WorkerState>, Path(user_id): Path<Uuid>) -> Json<Ack> {
    Json(state.manager.disconnect(user_id).await)
}
