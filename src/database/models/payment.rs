use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub report_id: Option<Uuid>,
    pub treatment_type_id: Option<Uuid>,
    pub amount: Decimal,
    pub payment_method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub paid_by: Option<String>,
    pub received_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl Payment {
    pub const STATUSES: [&'static str; 4] = ["success", "pending", "failed", "refunded"];
    pub const METHODS: [&'static str; 6] = ["Cash", "Card", "UPI", "Net Banking", "Cheque", "Other"];
}

impl TenantModel for Payment {
    const TABLE: &'static str = "payments";
    const WRITABLE: &'static [&'static str] = &[
        "patient_id",
        "report_id",
        "treatment_type_id",
        "amount",
        "payment_method",
        "status",
        "transaction_id",
        "notes",
        "paid_by",
        "received_by",
    ];
}
