//! Clinic-scoped business rules on top of the tenant repository

pub mod appointment_service;
pub mod attendance_service;
pub mod catalog_service;
pub mod clinic_service;
pub mod clinic_user_service;
pub mod invoice_service;
pub mod patient_service;
pub mod payment_service;
pub mod schedule_service;
pub mod template_service;

pub use appointment_service::AppointmentService;
pub use attendance_service::AttendanceService;
pub use catalog_service::CatalogService;
pub use clinic_service::ClinicService;
pub use clinic_user_service::ClinicUserService;
pub use invoice_service::InvoiceService;
pub use patient_service::PatientService;
pub use payment_service::PaymentService;
pub use schedule_service::ScheduleService;
pub use template_service::TemplateService;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::AuthError;
use crate::authz::PolicyError;
use crate::database::DatabaseError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{field}: {message}")]
    Duplicate { field: String, message: String },

    /// Illegal state transition, reported as a bad request
    #[error("{0}")]
    InvalidState(String),

    /// Operation refused because dependent records exist
    #[error("{0}")]
    Blocked(String),

    #[error("Outside the {radius_meters} m geofence")]
    Geofence { radius_meters: f64, action: &'static str },

    #[error("Already clocked in")]
    AlreadyClockedIn,

    #[error("Not clocked in")]
    NotClockedIn,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(DatabaseError::from(err))
    }
}

impl ServiceError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn duplicate(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Duplicate {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Turn a unique-constraint failure into `Duplicate`, pass everything else through
pub(crate) fn unique_as_duplicate(err: DatabaseError, field: &str, message: &str) -> ServiceError {
    match &err {
        DatabaseError::Sqlx(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            ServiceError::duplicate(field, message)
        }
        _ => ServiceError::Database(err),
    }
}

pub(crate) const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "clinic_id",
    "created_at",
    "updated_at",
    "synced_at",
    "sync_status",
];

/// Serialize an input struct into repository fields, dropping nulls and bookkeeping columns
pub(crate) fn to_fields<T: Serialize>(input: &T) -> Result<Map<String, Value>, ServiceError> {
    let value = serde_json::to_value(input).map_err(|e| ServiceError::validation("body", e.to_string()))?;
    match value {
        Value::Object(map) => Ok(strip_system_fields(map)
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect()),
        _ => Err(ServiceError::validation("body", "expected a JSON object")),
    }
}

pub(crate) fn strip_system_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in SYSTEM_FIELDS {
        fields.remove(*key);
    }
    fields
}

pub(crate) fn require_text(fields: &Map<String, Value>, field: &str) -> Result<String, ServiceError> {
    match fields.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ServiceError::validation(field, format!("{} is required", field))),
    }
}

/// `Some(text)` when the key is present; an explicit empty string is rejected
pub(crate) fn optional_text(fields: &Map<String, Value>, field: &str) -> Result<Option<String>, ServiceError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ServiceError::validation(field, format!("{} must be a non-empty string", field))),
    }
}

pub(crate) fn optional_uuid(fields: &Map<String, Value>, field: &str) -> Result<Option<uuid::Uuid>, ServiceError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| ServiceError::validation(field, format!("{} must be a UUID", field))),
        Some(_) => Err(ServiceError::validation(field, format!("{} must be a UUID", field))),
    }
}
