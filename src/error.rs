// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden, with an optional machine code (e.g. GEOFENCE_VIOLATION)
    Forbidden { message: String, code: Option<&'static str> },

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict { message: String, code: Option<&'static str> },

    // 422 Unprocessable Entity (validation but semantically valid JSON)
    UnprocessableEntity {
        message: String,
        field_errors: HashMap<String, String>,
    },

    // 500 Internal Server Error, only the correlation id leaves the process
    InternalServerError { correlation_id: Uuid },

    // 502 Bad Gateway (external service answered with garbage)
    BadGateway(String),

    // 503 Service Unavailable (WhatsApp/OAuth/cloud store unreachable)
    ServiceUnavailable(String),

    // 504 Gateway Timeout (transient, caller may retry)
    GatewayTimeout(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden { .. } => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict { .. } => 409,
            ApiError::UnprocessableEntity { .. } => 422,
            ApiError::InternalServerError { .. } => 500,
            ApiError::BadGateway(_) => 502,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::GatewayTimeout(_) => 504,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::ValidationError { message, .. } => message.clone(),
            ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Forbidden { message, .. } => message.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::Conflict { message, .. } => message.clone(),
            ApiError::UnprocessableEntity { message, .. } => message.clone(),
            ApiError::InternalServerError { correlation_id } => {
                format!("Internal server error (reference {})", correlation_id)
            }
            ApiError::BadGateway(msg) => msg.clone(),
            ApiError::ServiceUnavailable(msg) => msg.clone(),
            ApiError::GatewayTimeout(msg) => msg.clone(),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "success": false,
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        });

        match self {
            ApiError::ValidationError { field_errors: Some(field_errors), .. } => {
                response["field_errors"] = json!(field_errors);
            }
            ApiError::UnprocessableEntity { field_errors, .. } => {
                response["field_errors"] = json!(field_errors);
            }
            ApiError::InternalServerError { correlation_id } => {
                response["correlation_id"] = json!(correlation_id);
            }
            _ => {}
        }

        response
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden { code, .. } => code.unwrap_or("FORBIDDEN"),
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict { code, .. } => code.unwrap_or("CONFLICT"),
            ApiError::UnprocessableEntity { .. } => "UNPROCESSABLE_ENTITY",
            ApiError::InternalServerError { .. } => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    /// Validation failure on a single named field
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut field_errors = HashMap::new();
        field_errors.insert(field.to_string(), reason.clone());
        ApiError::validation_error(reason, Some(field_errors))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden { message: message.into(), code: None }
    }

    pub fn forbidden_with_code(message: impl Into<String>, code: &'static str) -> Self {
        ApiError::Forbidden { message: message.into(), code: Some(code) }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict { message: message.into(), code: None }
    }

    pub fn conflict_with_code(message: impl Into<String>, code: &'static str) -> Self {
        ApiError::Conflict { message: message.into(), code: Some(code) }
    }

    pub fn unprocessable_entity(
        message: impl Into<String>,
        field_errors: HashMap<String, String>,
    ) -> Self {
        ApiError::UnprocessableEntity {
            message: message.into(),
            field_errors,
        }
    }

    /// Log the real cause under a fresh correlation id and hide it from the client
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4();
        tracing::error!(%correlation_id, "internal error: {}", cause);
        ApiError::InternalServerError { correlation_id }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        ApiError::GatewayTimeout(message.into())
    }
}

// Convert module error types to ApiError
impl From<crate::database::DatabaseError> for ApiError {
    fn from(err: crate::database::DatabaseError) -> Self {
        use crate::database::DatabaseError;
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::UniqueViolation(msg) => ApiError::conflict(msg),
            DatabaseError::InvalidColumn(column) => {
                ApiError::invalid_field(&column, format!("Unknown field '{}'", column))
            }
            DatabaseError::ConfigMissing(_) | DatabaseError::InvalidDatabaseUrl => {
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) | DatabaseError::Sqlx(sqlx::Error::Io(_)) => {
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx_err) => {
                if let Some(db_err) = sqlx_err.as_database_error() {
                    if db_err.is_unique_violation() {
                        return ApiError::conflict("Record already exists");
                    }
                    if db_err.is_foreign_key_violation() {
                        return ApiError::conflict("Record is referenced by other records");
                    }
                }
                ApiError::internal(sqlx_err)
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::from(crate::database::DatabaseError::from(err))
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(err: crate::auth::AuthError) -> Self {
        use crate::auth::AuthError;
        match err {
            AuthError::InvalidCredentials => ApiError::unauthorized("Invalid email or password"),
            AuthError::PasswordNotSet => ApiError::unauthorized(
                "This account uses OAuth sign-in and has no password. Sign in with OAuth or set a password first",
            ),
            AuthError::UserInactive => ApiError::forbidden("User account is inactive"),
            AuthError::InvalidToken(msg) => ApiError::unauthorized(msg),
            AuthError::TokenExpired => ApiError::unauthorized("Token has expired"),
            AuthError::InvalidEmail(email) => {
                ApiError::invalid_field("email", format!("'{}' is not a valid email address", email))
            }
            AuthError::InvalidRole(role) => ApiError::invalid_field("role", format!("Unknown role '{}'", role)),
            AuthError::EmailTaken(email) => {
                ApiError::conflict(format!("Email '{}' is already registered", email))
            }
            AuthError::WeakPassword(min) => ApiError::invalid_field(
                "new_password",
                format!("Password must be at least {} characters", min),
            ),
            AuthError::IncorrectCurrentPassword => {
                ApiError::invalid_field("current_password", "Current password is incorrect")
            }
            AuthError::IdentityRejected(msg) => ApiError::unauthorized(msg),
            AuthError::VerifierUnavailable(msg) => ApiError::service_unavailable(msg),
            AuthError::Device(device_err) => device_err.into(),
            AuthError::Configuration(msg) => ApiError::internal(msg),
            AuthError::Hashing(msg) => ApiError::internal(msg),
            AuthError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<crate::devices::DeviceError> for ApiError {
    fn from(err: crate::devices::DeviceError) -> Self {
        use crate::devices::DeviceError;
        match err {
            DeviceError::AccessDenied(device_type) => ApiError::forbidden_with_code(
                format!("Access from {} devices is not allowed", device_type),
                "DEVICE_NOT_ALLOWED",
            ),
            DeviceError::NotFound => ApiError::not_found("Device not found"),
            DeviceError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<crate::authz::PolicyError> for ApiError {
    fn from(err: crate::authz::PolicyError) -> Self {
        use crate::authz::PolicyError;
        match err {
            PolicyError::UnknownRole(role) => {
                ApiError::invalid_field("role", format!("Unknown role '{}'", role))
            }
            PolicyError::UnknownResource(resource) => {
                ApiError::invalid_field("resource", format!("Unknown resource '{}'", resource))
            }
            PolicyError::UnknownAction(action) => {
                ApiError::invalid_field("action", format!("Unknown action '{}'", action))
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<crate::services::ServiceError> for ApiError {
    fn from(err: crate::services::ServiceError) -> Self {
        use crate::services::ServiceError;
        match err {
            ServiceError::Validation { field, message } => ApiError::invalid_field(&field, message),
            ServiceError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            ServiceError::Duplicate { field, message } => ApiError::Conflict {
                message: format!("{} ({})", message, field),
                code: Some("DUPLICATE"),
            },
            ServiceError::InvalidState(msg) => ApiError::bad_request(msg),
            ServiceError::Blocked(msg) => ApiError::conflict(msg),
            ServiceError::Geofence { radius_meters, action } => ApiError::forbidden_with_code(
                format!("You must be within {} meters of the clinic to {}", radius_meters, action),
                "GEOFENCE_VIOLATION",
            ),
            ServiceError::AlreadyClockedIn => {
                ApiError::conflict_with_code("You are already clocked in today", "ALREADY_CLOCKED_IN")
            }
            ServiceError::NotClockedIn => {
                ApiError::conflict_with_code("You are not clocked in today", "NOT_CLOCKED_IN")
            }
            ServiceError::Auth(auth_err) => auth_err.into(),
            ServiceError::Policy(policy_err) => policy_err.into(),
            ServiceError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<crate::sync::SyncError> for ApiError {
    fn from(err: crate::sync::SyncError) -> Self {
        use crate::sync::SyncError;
        match err {
            SyncError::CloudNotConfigured => {
                ApiError::service_unavailable("Cloud database is not configured")
            }
            SyncError::AlreadyRunning(clinic_id) => ApiError::conflict_with_code(
                format!("A sync run is already in progress for clinic {}", clinic_id),
                "SYNC_IN_PROGRESS",
            ),
            SyncError::UnknownTable(table) => {
                ApiError::invalid_field("table", format!("Unknown sync table '{}'", table))
            }
            SyncError::Unreachable(msg) => ApiError::service_unavailable(msg),
            other => ApiError::internal(other),
        }
    }
}

impl From<crate::whatsapp::WhatsAppError> for ApiError {
    fn from(err: crate::whatsapp::WhatsAppError) -> Self {
        use crate::whatsapp::WhatsAppError;
        match err {
            WhatsAppError::NotReady(state) => ApiError::conflict_with_code(
                format!("WhatsApp session is not ready (state: {})", state),
                "WHATSAPP_NOT_READY",
            ),
            WhatsAppError::CapacityReached(cap) => ApiError::service_unavailable(format!(
                "WhatsApp session capacity reached ({} active sessions)",
                cap
            )),
            WhatsAppError::InvalidPhone => ApiError::invalid_field("phone", "Invalid phone number"),
            WhatsAppError::Timeout(what) => ApiError::gateway_timeout(format!("Timed out: {}", what)),
            WhatsAppError::Unavailable(msg) => ApiError::service_unavailable(msg),
            WhatsAppError::Upstream(msg) => ApiError::bad_gateway(msg),
            other => ApiError::internal(other),
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        use axum::extract::rejection::JsonRejection;
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::unprocessable_entity(e.body_text(), HashMap::new()),
            JsonRejection::JsonSyntaxError(e) => ApiError::bad_request(e.body_text()),
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::bad_request("Expected request with `Content-Type: application/json`")
            }
            other => ApiError::bad_request(other.body_text()),
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_expose_only_correlation_id() {
        let err = ApiError::internal("relation \"patients\" does not exist");
        let body = err.to_json();
        assert_eq!(err.status_code(), 500);
        assert!(body["correlation_id"].is_string());
        assert!(!body["message"].as_str().unwrap_or_default().contains("patients"));
    }

    #[test]
    fn field_validation_names_the_field() {
        let body = ApiError::invalid_field("scheduled_at", "must be in the future").to_json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field_errors"]["scheduled_at"], "must be in the future");
        assert_eq!(body["success"], false);
    }

    #[test]
    fn geofence_and_clock_state_have_distinct_kinds() {
        let geofence: ApiError = crate::services::ServiceError::Geofence {
            radius_meters: 100.0,
            action: "clock in",
        }
        .into();
        let already: ApiError = crate::services::ServiceError::AlreadyClockedIn.into();
        assert_eq!(geofence.status_code(), 403);
        assert_eq!(geofence.error_code(), "GEOFENCE_VIOLATION");
        assert_eq!(already.status_code(), 409);
        assert_eq!(already.error_code(), "ALREADY_CLOCKED_IN");
    }

    #[test]
    fn device_denial_message_names_device_class() {
        let err: ApiError = crate::devices::DeviceError::AccessDenied(crate::devices::DeviceType::Mobile).into();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.message(), "Access from mobile devices is not allowed");
    }
}
