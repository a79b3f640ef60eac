use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub payment_mode: Option<String>,
    pub utr: Option<String>,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl Invoice {
    pub fn status(&self) -> Option<InvoiceStatus> {
        self.status.parse().ok()
    }
}

impl TenantModel for Invoice {
    const TABLE: &'static str = "invoices";
    const WRITABLE: &'static [&'static str] = &[
        "patient_id",
        "invoice_number",
        "status",
        "subtotal",
        "tax",
        "total",
        "payment_mode",
        "utr",
        "notes",
        "paid_at",
        "created_by",
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub invoice_id: Uuid,
    pub treatment_type_id: Option<Uuid>,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl TenantModel for InvoiceLineItem {
    const TABLE: &'static str = "invoice_line_items";
    const WRITABLE: &'static [&'static str] =
        &["invoice_id", "treatment_type_id", "description", "quantity", "unit_price", "amount"];
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceAuditLog {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub invoice_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    PaidUnverified,
    PaidVerified,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::PaidUnverified => "paid_unverified",
            InvoiceStatus::PaidVerified => "paid_verified",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// draft -> paid_unverified | cancelled; paid_unverified -> paid_verified | cancelled
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::PaidUnverified)
                | (InvoiceStatus::Draft, InvoiceStatus::Cancelled)
                | (InvoiceStatus::PaidUnverified, InvoiceStatus::PaidVerified)
                | (InvoiceStatus::PaidUnverified, InvoiceStatus::Cancelled)
        )
    }

    pub fn is_editable(&self) -> bool {
        *self == InvoiceStatus::Draft
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "paid_unverified" => Ok(InvoiceStatus::PaidUnverified),
            "paid_verified" => Ok(InvoiceStatus::PaidVerified),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceAction {
    Created,
    Updated,
    LineItemAdded,
    LineItemUpdated,
    LineItemDeleted,
    MarkedPaid,
    Verified,
    Cancelled,
}

impl InvoiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceAction::Created => "created",
            InvoiceAction::Updated => "updated",
            InvoiceAction::LineItemAdded => "line_item_added",
            InvoiceAction::LineItemUpdated => "line_item_updated",
            InvoiceAction::LineItemDeleted => "line_item_deleted",
            InvoiceAction::MarkedPaid => "marked_paid",
            InvoiceAction::Verified => "verified",
            InvoiceAction::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [InvoiceStatus::Draft, InvoiceStatus::PaidUnverified, InvoiceStatus::PaidVerified, InvoiceStatus::Cancelled] {
            assert!(!InvoiceStatus::PaidVerified.can_transition_to(next));
            assert!(!InvoiceStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn draft_cannot_skip_to_verified() {
        assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::PaidUnverified));
        assert!(!InvoiceStatus::Draft.can_transition_to(InvoiceStatus::PaidVerified));
        assert!(InvoiceStatus::PaidUnverified.can_transition_to(InvoiceStatus::Cancelled));
    }
}
