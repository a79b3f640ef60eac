use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub village: String,
    pub phone: String,
    pub referred_by: String,
    pub referring_doctor_id: Option<Uuid>,
    pub treatment_type: String,
    pub notes: Option<String>,
    pub payment_type: String,
    pub dental_chart: serde_json::Value,
    pub tooth_notes: serde_json::Value,
    pub treatment_plan: serde_json::Value,
    pub prescriptions: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl TenantModel for Patient {
    const TABLE: &'static str = "patients";
    const WRITABLE: &'static [&'static str] = &[
        "name",
        "age",
        "gender",
        "village",
        "phone",
        "referred_by",
        "referring_doctor_id",
        "treatment_type",
        "notes",
        "payment_type",
        "dental_chart",
        "tooth_notes",
        "treatment_plan",
        "prescriptions",
        "created_by",
    ];
}

/// Radiology report; only its existence matters here (it blocks patient deletion)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Report {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub status: String,
    pub content: Option<String>,
    pub pdf_url: Option<String>,
    pub whatsapp_sent_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl TenantModel for Report {
    const TABLE: &'static str = "reports";
    const WRITABLE: &'static [&'static str] = &["patient_id", "status", "content", "pdf_url", "whatsapp_sent_count"];
}
