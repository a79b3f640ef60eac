use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use super::catalog_service::parse_decimal;
use super::ServiceError;
use crate::database::models::{Invoice, InvoiceAction, InvoiceAuditLog, InvoiceLineItem, InvoiceStatus};
use crate::database::TenantRepository;

#[derive(Debug, Clone, Deserialize)]
pub struct NewLineItem {
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub unit_price: Value,
    pub treatment_type_id: Option<Uuid>,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItemUpdate {
    pub description: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub patient_id: Uuid,
    #[serde(default)]
    pub line_items: Vec<NewLineItem>,
    pub tax: Option<Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceUpdate {
    pub tax: Option<Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPaid {
    pub payment_mode: String,
    pub utr: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
}

/// A validated line item ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemDraft {
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub treatment_type_id: Option<Uuid>,
}

impl LineItemDraft {
    pub fn amount(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }

    fn from_request(item: &NewLineItem) -> Result<Self, ServiceError> {
        let description = item.description.trim();
        if description.is_empty() {
            return Err(ServiceError::validation("description", "description is required"));
        }
        if item.quantity < 1 {
            return Err(ServiceError::validation("quantity", "quantity must be at least 1"));
        }
        Ok(Self {
            description: description.to_string(),
            quantity: item.quantity,
            unit_price: money(&item.unit_price, "unit_price")?,
            treatment_type_id: item.treatment_type_id,
        })
    }
}

pub fn format_invoice_number(year: i32, seq: i32) -> String {
    format!("INV-{}-{:04}", year, seq)
}

fn money(value: &Value, field: &str) -> Result<Decimal, ServiceError> {
    match parse_decimal(value) {
        Some(d) if d >= Decimal::ZERO => Ok(d.round_dp(2)),
        _ => Err(ServiceError::validation(field, format!("{} must be a non-negative amount", field))),
    }
}

/// Next dense sequence number for (clinic, year); the counter row lock serializes creators
pub async fn next_invoice_number(conn: &mut PgConnection, clinic_id: Uuid, year: i32) -> Result<String, ServiceError> {
    let (seq,): (i32,) = sqlx::query_as(
        "INSERT INTO invoice_counters (clinic_id, year, next_seq) \
         VALUES ($1, $2, ( \
             SELECT COALESCE(MAX(substring(invoice_number FROM '^INV-[0-9]{4}-([0-9]+)$')::int), 0) + 2 \
             FROM invoices WHERE clinic_id = $1 AND invoice_number LIKE $3)) \
         ON CONFLICT (clinic_id, year) DO UPDATE \
             SET next_seq = GREATEST(invoice_counters.next_seq, EXCLUDED.next_seq - 1) + 1 \
         RETURNING next_seq - 1",
    )
    .bind(clinic_id)
    .bind(year)
    .bind(format!("INV-{}-%", year))
    .fetch_one(&mut *conn)
    .await?;
    Ok(format_invoice_number(year, seq))
}

pub(crate) async fn append_audit(
    conn: &mut PgConnection,
    invoice: &Invoice,
    actor: Option<Uuid>,
    action: InvoiceAction,
    old_values: Option<Value>,
    new_values: Option<Value>,
) -> Result<(), ServiceError> {
    sqlx::query(
        "INSERT INTO invoice_audit_logs (clinic_id, invoice_id, actor_user_id, action, old_values, new_values) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(invoice.clinic_id)
    .bind(invoice.id)
    .bind(actor)
    .bind(action.as_str())
    .bind(old_values)
    .bind(new_values)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_line_item(conn: &mut PgConnection, invoice: &Invoice, item: &LineItemDraft) -> Result<InvoiceLineItem, ServiceError> {
    Ok(sqlx::query_as::<_, InvoiceLineItem>(
        "INSERT INTO invoice_line_items (clinic_id, invoice_id, treatment_type_id, description, quantity, unit_price, amount) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(invoice.clinic_id)
    .bind(invoice.id)
    .bind(item.treatment_type_id)
    .bind(&item.description)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.amount())
    .fetch_one(&mut *conn)
    .await?)
}

/// total = sum(line amounts) + tax
async fn recompute_totals(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Invoice, ServiceError> {
    Ok(sqlx::query_as::<_, Invoice>(
        "UPDATE invoices AS i SET subtotal = s.sum, total = s.sum + i.tax \
         FROM (SELECT COALESCE(SUM(amount), 0) AS sum FROM invoice_line_items WHERE invoice_id = $1) AS s \
         WHERE i.id = $1 RETURNING i.*",
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?)
}

/// Insert a numbered draft with its line items inside the caller's transaction
pub async fn create_draft_in(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    patient_id: Uuid,
    actor: Option<Uuid>,
    items: &[LineItemDraft],
    tax: Decimal,
    notes: Option<&str>,
) -> Result<Invoice, ServiceError> {
    let number = next_invoice_number(conn, clinic_id, Utc::now().year()).await?;
    let invoice = sqlx::query_as::<_, Invoice>(
        "INSERT INTO invoices (clinic_id, patient_id, invoice_number, status, tax, notes, created_by) \
         VALUES ($1, $2, $3, 'draft', $4, $5, $6) RETURNING *",
    )
    .bind(clinic_id)
    .bind(patient_id)
    .bind(&number)
    .bind(tax)
    .bind(notes)
    .bind(actor)
    .fetch_one(&mut *conn)
    .await?;

    for item in items {
        insert_line_item(conn, &invoice, item).await?;
    }
    let invoice = recompute_totals(conn, invoice.id).await?;
    append_audit(conn, &invoice, actor, InvoiceAction::Created, None, Some(json!(invoice))).await?;
    info!(clinic_id = %clinic_id, invoice_id = %invoice.id, number = %invoice.invoice_number, "Created draft invoice");
    Ok(invoice)
}

pub struct InvoiceService {
    pool: PgPool,
    repo: TenantRepository<Invoice>,
}

impl InvoiceService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: TenantRepository::new(pool.clone()),
            pool,
        }
    }

    /// Lookup by the clinic's human-facing number, e.g. `INV-2024-0001`
    pub async fn find_by_number(&self, clinic_id: Uuid, number: &str) -> Result<InvoiceWithItems, ServiceError> {
        let invoice = self
            .repo
            .get_by_invoice_number(clinic_id, number.trim())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invoice".to_string()))?;
        self.get(clinic_id, invoice.id).await
    }

    async fn lock(conn: &mut PgConnection, clinic_id: Uuid, id: Uuid) -> Result<Invoice, ServiceError> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 AND clinic_id = $2 FOR UPDATE")
            .bind(id)
            .bind(clinic_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invoice".to_string()))
    }

    fn require_draft(invoice: &Invoice) -> Result<(), ServiceError> {
        match invoice.status() {
            Some(status) if status.is_editable() => Ok(()),
            _ => Err(ServiceError::InvalidState("Can only edit draft invoices".to_string())),
        }
    }

    async fn line_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, ServiceError> {
        Ok(sqlx::query_as::<_, InvoiceLineItem>(
            "SELECT * FROM invoice_line_items WHERE invoice_id = $1 ORDER BY created_at, id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list(
        &self,
        clinic_id: Uuid,
        status: Option<&str>,
        patient_id: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Invoice>, ServiceError> {
        if let Some(s) = status {
            s.parse::<InvoiceStatus>()
                .map_err(|s| ServiceError::validation("status", format!("Unknown invoice status '{}'", s)))?;
        }
        Ok(sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE clinic_id = $1 AND ($2::text IS NULL OR status = $2) \
             AND ($3::uuid IS NULL OR patient_id = $3) \
             ORDER BY created_at DESC, id OFFSET $4 LIMIT $5",
        )
        .bind(clinic_id)
        .bind(status)
        .bind(patient_id)
        .bind(offset.max(0))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get(&self, clinic_id: Uuid, id: Uuid) -> Result<InvoiceWithItems, ServiceError> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 AND clinic_id = $2")
            .bind(id)
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invoice".to_string()))?;
        let line_items = self.line_items(invoice.id).await?;
        Ok(InvoiceWithItems { invoice, line_items })
    }

    pub async fn create(&self, clinic_id: Uuid, actor: Uuid, input: NewInvoice) -> Result<InvoiceWithItems, ServiceError> {
        let items = input
            .line_items
            .iter()
            .map(LineItemDraft::from_request)
            .collect::<Result<Vec<_>, _>>()?;
        let tax = match &input.tax {
            Some(v) => money(v, "tax")?,
            None => Decimal::ZERO,
        };

        let mut tx = self.pool.begin().await?;
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1 AND clinic_id = $2)")
                .bind(input.patient_id)
                .bind(clinic_id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            return Err(ServiceError::validation("patient_id", "Patient not found in this clinic"));
        }
        let invoice = create_draft_in(&mut tx, clinic_id, input.patient_id, Some(actor), &items, tax, input.notes.as_deref()).await?;
        tx.commit().await?;

        let line_items = self.line_items(invoice.id).await?;
        Ok(InvoiceWithItems { invoice, line_items })
    }

    pub async fn update(&self, clinic_id: Uuid, actor: Uuid, id: Uuid, update: InvoiceUpdate) -> Result<Invoice, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let before = Self::lock(&mut tx, clinic_id, id).await?;
        Self::require_draft(&before)?;

        let tax = match &update.tax {
            Some(v) => money(v, "tax")?,
            None => before.tax,
        };
        sqlx::query("UPDATE invoices SET tax = $2, notes = COALESCE($3, notes) WHERE id = $1")
            .bind(id)
            .bind(tax)
            .bind(update.notes.as_deref())
            .execute(&mut *tx)
            .await?;
        let after = recompute_totals(&mut tx, id).await?;
        append_audit(&mut tx, &after, Some(actor), InvoiceAction::Updated, Some(json!(before)), Some(json!(after))).await?;
        tx.commit().await?;
        Ok(after)
    }

    pub async fn add_line_item(&self, clinic_id: Uuid, actor: Uuid, id: Uuid, item: NewLineItem) -> Result<InvoiceWithItems, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let invoice = Self::lock(&mut tx, clinic_id, id).await?;
        Self::require_draft(&invoice)?;
        let draft = LineItemDraft::from_request(&item)?;

        let created = insert_line_item(&mut tx, &invoice, &draft).await?;
        let after = recompute_totals(&mut tx, id).await?;
        append_audit(&mut tx, &after, Some(actor), InvoiceAction::LineItemAdded, None, Some(json!(created))).await?;
        tx.commit().await?;

        let line_items = self.line_items(id).await?;
        Ok(InvoiceWithItems { invoice: after, line_items })
    }

    pub async fn update_line_item(
        &self,
        clinic_id: Uuid,
        actor: Uuid,
        id: Uuid,
        item_id: Uuid,
        update: LineItemUpdate,
    ) -> Result<InvoiceWithItems, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let invoice = Self::lock(&mut tx, clinic_id, id).await?;
        Self::require_draft(&invoice)?;

        let before = sqlx::query_as::<_, InvoiceLineItem>(
            "SELECT * FROM invoice_line_items WHERE id = $1 AND invoice_id = $2",
        )
        .bind(item_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Line item".to_string()))?;

        let draft = LineItemDraft::from_request(&NewLineItem {
            description: update.description.unwrap_or_else(|| before.description.clone()),
            quantity: update.quantity.unwrap_or(before.quantity),
            unit_price: update.unit_price.unwrap_or_else(|| json!(before.unit_price)),
            treatment_type_id: before.treatment_type_id,
        })?;

        let after_item = sqlx::query_as::<_, InvoiceLineItem>(
            "UPDATE invoice_line_items SET description = $2, quantity = $3, unit_price = $4, amount = $5 \
             WHERE id = $1 RETURNING *",
        )
        .bind(item_id)
        .bind(&draft.description)
        .bind(draft.quantity)
        .bind(draft.unit_price)
        .bind(draft.amount())
        .fetch_one(&mut *tx)
        .await?;
        let after = recompute_totals(&mut tx, id).await?;
        append_audit(
            &mut tx,
            &after,
            Some(actor),
            InvoiceAction::LineItemUpdated,
            Some(json!(before)),
            Some(json!(after_item)),
        )
        .await?;
        tx.commit().await?;

        let line_items = self.line_items(id).await?;
        Ok(InvoiceWithItems { invoice: after, line_items })
    }

    pub async fn delete_line_item(&self, clinic_id: Uuid, actor: Uuid, id: Uuid, item_id: Uuid) -> Result<InvoiceWithItems, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let invoice = Self::lock(&mut tx, clinic_id, id).await?;
        Self::require_draft(&invoice)?;

        let removed = sqlx::query_as::<_, InvoiceLineItem>(
            "DELETE FROM invoice_line_items WHERE id = $1 AND invoice_id = $2 RETURNING *",
        )
        .bind(item_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Line item".to_string()))?;
        let after = recompute_totals(&mut tx, id).await?;
        append_audit(&mut tx, &after, Some(actor), InvoiceAction::LineItemDeleted, Some(json!(removed)), None).await?;
        tx.commit().await?;

        let line_items = self.line_items(id).await?;
        Ok(InvoiceWithItems { invoice: after, line_items })
    }

    async fn transition(
        &self,
        clinic_id: Uuid,
        actor: Uuid,
        id: Uuid,
        next: InvoiceStatus,
        action: InvoiceAction,
        payment: Option<&MarkPaid>,
    ) -> Result<Invoice, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let before = Self::lock(&mut tx, clinic_id, id).await?;
        let current = before
            .status()
            .ok_or_else(|| ServiceError::InvalidState(format!("Invoice has unknown status '{}'", before.status)))?;
        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidState(format!(
                "Cannot change invoice from {} to {}",
                current, next
            )));
        }

        let after = sqlx::query_as::<_, Invoice>(
            "UPDATE invoices SET status = $2, \
             payment_mode = COALESCE($3, payment_mode), utr = COALESCE($4, utr), \
             paid_at = CASE WHEN $2 = 'paid_unverified' THEN now() ELSE paid_at END \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(next.as_str())
        .bind(payment.map(|p| p.payment_mode.trim().to_string()))
        .bind(payment.and_then(|p| p.utr.as_deref().map(str::trim)))
        .fetch_one(&mut *tx)
        .await?;
        append_audit(&mut tx, &after, Some(actor), action, Some(json!(before)), Some(json!(after))).await?;
        tx.commit().await?;
        info!(clinic_id = %clinic_id, invoice_id = %id, status = %next, "Invoice status changed");
        Ok(after)
    }

    pub async fn mark_as_paid(&self, clinic_id: Uuid, actor: Uuid, id: Uuid, payment: MarkPaid) -> Result<Invoice, ServiceError> {
        if payment.payment_mode.trim().is_empty() {
            return Err(ServiceError::validation("payment_mode", "payment_mode is required"));
        }
        self.transition(clinic_id, actor, id, InvoiceStatus::PaidUnverified, InvoiceAction::MarkedPaid, Some(&payment))
            .await
    }

    pub async fn verify(&self, clinic_id: Uuid, actor: Uuid, id: Uuid) -> Result<Invoice, ServiceError> {
        self.transition(clinic_id, actor, id, InvoiceStatus::PaidVerified, InvoiceAction::Verified, None)
            .await
    }

    pub async fn cancel(&self, clinic_id: Uuid, actor: Uuid, id: Uuid) -> Result<Invoice, ServiceError> {
        self.transition(clinic_id, actor, id, InvoiceStatus::Cancelled, InvoiceAction::Cancelled, None)
            .await
    }

    pub async fn audit_logs(&self, clinic_id: Uuid, id: Uuid) -> Result<Vec<InvoiceAuditLog>, ServiceError> {
        self.get(clinic_id, id).await?;
        Ok(sqlx::query_as::<_, InvoiceAuditLog>(
            "SELECT * FROM invoice_audit_logs WHERE invoice_id = $1 AND clinic_id = $2 ORDER BY created_at, id",
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_zero_padded() {
        assert_eq!(format_invoice_number(2024, 1), "INV-2024-0001");
        assert_eq!(format_invoice_number(2024, 12345), "INV-2024-12345");
    }

    #[test]
    fn line_amount_is_quantity_times_price() {
        let item = LineItemDraft::from_request(&NewLineItem {
            description: "Root canal".into(),
            quantity: 2,
            unit_price: json!("1250.50"),
            treatment_type_id: None,
        })
        .unwrap();
        assert_eq!(item.amount(), Decimal::new(250100, 2));
    }

    #[test]
    fn line_items_are_validated() {
        let bad_qty = NewLineItem {
            description: "X-ray".into(),
            quantity: 0,
            unit_price: json!(100),
            treatment_type_id: None,
        };
        assert!(matches!(
            LineItemDraft::from_request(&bad_qty),
            Err(ServiceError::Validation { field, .. }) if field == "quantity"
        ));

        let bad_price = NewLineItem {
            description: "X-ray".into(),
            quantity: 1,
            unit_price: json!(-5),
            treatment_type_id: None,
        };
        assert!(LineItemDraft::from_request(&bad_price).is_err());
    }
}
