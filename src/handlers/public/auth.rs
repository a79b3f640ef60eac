// handlers/public/auth.rs - POST /auth/register, /auth/login, /auth/oauth, /auth/refresh-token

use axum::{extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{LoginOutcome, RegisterRequest};
use crate::devices::DeviceInfo;
use crate::error::ApiError;
use crate::middleware::auth::extract_jwt_from_headers;
use crate::middleware::{ApiJson, ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_info: Option<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthRequest {
    pub id_token: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/**
 * POST /auth/register - Create a password account
 *
 * Input: `{email, password, first_name, last_name, role?}`
 * Output (201): token pair plus the new user. Duplicate email is 409.
 */
pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<LoginOutcome> {
    let user = state.auth.register(request).await?;
    let tokens = state.auth.issue_tokens(user.id)?;
    Ok(ApiResponse::created(LoginOutcome { tokens, user, device: None }))
}

/**
 * POST /auth/login - Password login
 *
 * The device is taken from `device_info` or, failing that, detected from the
 * User-Agent header. It is gated against the user's registered devices before
 * any token is issued.
 */
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<LoginOutcome> {
    let device = request.device_info.or_else(|| {
        headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .filter(|ua| !ua.is_empty())
            .map(DeviceInfo::detect)
    });

    let outcome = state.auth.login(&request.email, &request.password, device).await?;
    Ok(ApiResponse::success(outcome))
}

/// POST /auth/oauth - Sign in with an identity token from the OAuth verifier
pub async fn oauth(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<OAuthRequest>,
) -> ApiResult<LoginOutcome> {
    let user = state
        .auth
        .handle_oauth(state.verifier.as_ref(), &request.id_token, request.role.as_deref())
        .await?;
    let tokens = state.auth.issue_tokens(user.id)?;
    info!(user_id = %user.id, "OAuth sign-in");
    Ok(ApiResponse::success(LoginOutcome { tokens, user, device: None }))
}

/// POST /auth/refresh-token - Exchange a refresh token (body or bearer header) for an access token
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<ApiJson<RefreshRequest>>,
) -> ApiResult<AccessToken> {
    let token = match body {
        Some(ApiJson(request)) => request.refresh_token,
        None => extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?,
    };

    let access_token = state.auth.refresh(&token).await?;
    Ok(ApiResponse::success(AccessToken {
        access_token,
        token_type: "bearer",
        expires_in: state.auth.tokens().access_ttl_secs(),
    }))
}
