use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::repository::TenantModel;

/// Root of a tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gst_number: Option<String>,
    pub specialization: String,
    pub subscription_plan: String,
    pub status: String,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub timings: serde_json::Value,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl Clinic {
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

impl TenantModel for Clinic {
    const TABLE: &'static str = "clinics";
    const WRITABLE: &'static [&'static str] = &[
        "name",
        "address",
        "phone",
        "email",
        "gst_number",
        "specialization",
        "subscription_plan",
        "status",
        "logo_url",
        "primary_color",
        "timings",
        "latitude",
        "longitude",
    ];
    const SCOPE_COLUMN: &'static str = "id";
}
