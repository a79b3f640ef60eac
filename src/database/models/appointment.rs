use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub treatment: String,
    pub appointment_date: DateTime<Utc>,
    pub start_time: String,
    pub end_time: String,
    pub duration: i32,
    pub status: String,
    pub notes: Option<String>,
    pub visit_number: Option<i32>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl TenantModel for Appointment {
    const TABLE: &'static str = "appointments";
    const WRITABLE: &'static [&'static str] = &[
        "patient_id",
        "patient_name",
        "patient_email",
        "patient_phone",
        "doctor_id",
        "treatment",
        "appointment_date",
        "start_time",
        "end_time",
        "duration",
        "status",
        "notes",
        "visit_number",
        "created_by",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(other.to_string()),
        }
    }
}
