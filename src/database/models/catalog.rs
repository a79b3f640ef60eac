use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreatmentType {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl TenantModel for TreatmentType {
    const TABLE: &'static str = "treatment_types";
    const WRITABLE: &'static [&'static str] = &["name", "price", "is_active"];
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferringDoctor {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub hospital: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl TenantModel for ReferringDoctor {
    const TABLE: &'static str = "referring_doctors";
    const WRITABLE: &'static [&'static str] = &["name", "hospital", "phone", "is_active"];
}
