use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::catalog_service::parse_decimal;
use super::{optional_text, optional_uuid, strip_system_fields, unique_as_duplicate, ServiceError};
use crate::database::models::Payment;
use crate::database::TenantRepository;

pub struct PaymentService {
    pool: PgPool,
    repo: TenantRepository<Payment>,
}

fn validate(fields: &Map<String, Value>) -> Result<(), ServiceError> {
    if let Some(amount) = fields.get("amount") {
        match parse_decimal(amount) {
            Some(a) if a > Decimal::ZERO => {}
            _ => return Err(ServiceError::validation("amount", "amount must be greater than zero")),
        }
    }
    if let Some(method) = fields.get("payment_method") {
        if !method.as_str().map(|m| Payment::METHODS.contains(&m)).unwrap_or(false) {
            return Err(ServiceError::validation(
                "payment_method",
                format!("payment_method must be one of {}", Payment::METHODS.join(", ")),
            ));
        }
    }
    if let Some(status) = fields.get("status") {
        if !status.as_str().map(|s| Payment::STATUSES.contains(&s)).unwrap_or(false) {
            return Err(ServiceError::validation(
                "status",
                format!("status must be one of {}", Payment::STATUSES.join(", ")),
            ));
        }
    }
    Ok(())
}

impl PaymentService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: TenantRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn list(&self, clinic_id: Uuid, patient_id: Option<Uuid>, offset: i64, limit: i64) -> Result<Vec<Payment>, ServiceError> {
        Ok(sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE clinic_id = $1 AND ($2::uuid IS NULL OR patient_id = $2) \
             ORDER BY created_at DESC, id OFFSET $3 LIMIT $4",
        )
        .bind(clinic_id)
        .bind(patient_id)
        .bind(offset.max(0))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get(&self, clinic_id: Uuid, id: Uuid) -> Result<Payment, ServiceError> {
        self.repo
            .get_in_clinic(clinic_id, id)
            .await
            .map_err(|_| ServiceError::NotFound("Payment".to_string()))
    }

    async fn check_patient(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<(), ServiceError> {
        let (ok,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1 AND clinic_id = $2)")
            .bind(patient_id)
            .bind(clinic_id)
            .fetch_one(&self.pool)
            .await?;
        if !ok {
            return Err(ServiceError::validation("patient_id", "Patient not found in this clinic"));
        }
        Ok(())
    }

    async fn check_transaction_free(&self, clinic_id: Uuid, transaction_id: &str, exclude: Option<Uuid>) -> Result<(), ServiceError> {
        let (taken,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM payments WHERE clinic_id = $1 AND transaction_id = $2 \
             AND ($3::uuid IS NULL OR id <> $3))",
        )
        .bind(clinic_id)
        .bind(transaction_id)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        if taken {
            return Err(ServiceError::duplicate("transaction_id", "A payment with this transaction id already exists"));
        }
        Ok(())
    }

    pub async fn create(&self, clinic_id: Uuid, actor: Uuid, fields: Map<String, Value>) -> Result<Payment, ServiceError> {
        let mut fields = strip_system_fields(fields);
        validate(&fields)?;
        let patient_id = optional_uuid(&fields, "patient_id")?
            .ok_or_else(|| ServiceError::validation("patient_id", "patient_id is required"))?;
        if !fields.contains_key("amount") {
            return Err(ServiceError::validation("amount", "amount is required"));
        }
        self.check_patient(clinic_id, patient_id).await?;
        if let Some(tx_id) = optional_text(&fields, "transaction_id")? {
            self.check_transaction_free(clinic_id, &tx_id, None).await?;
        }
        fields.entry("status").or_insert(Value::String("success".into()));
        fields.entry("payment_method").or_insert(Value::String("Cash".into()));
        fields.insert("received_by".into(), Value::String(actor.to_string()));

        let payment = self
            .repo
            .create(clinic_id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "transaction_id", "A payment with this transaction id already exists"))?;
        info!(clinic_id = %clinic_id, payment_id = %payment.id, "Recorded payment");
        Ok(payment)
    }

    pub async fn update(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<Payment, ServiceError> {
        let mut fields = strip_system_fields(fields);
        fields.remove("received_by");
        validate(&fields)?;
        self.get(clinic_id, id).await?;
        if let Some(patient_id) = optional_uuid(&fields, "patient_id")? {
            self.check_patient(clinic_id, patient_id).await?;
        }
        if let Some(tx_id) = optional_text(&fields, "transaction_id")? {
            self.check_transaction_free(clinic_id, &tx_id, Some(id)).await?;
        }
        self.repo
            .update(clinic_id, id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "transaction_id", "A payment with this transaction id already exists"))
    }

    pub async fn delete(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.get(clinic_id, id).await?;
        Ok(self.repo.delete(clinic_id, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enumerations_are_enforced() {
        let ok = json!({ "amount": 500, "payment_method": "UPI", "status": "pending" });
        assert!(validate(ok.as_object().unwrap()).is_ok());

        let bad_method = json!({ "payment_method": "Bitcoin" });
        assert!(matches!(
            validate(bad_method.as_object().unwrap()),
            Err(ServiceError::Validation { field, .. }) if field == "payment_method"
        ));

        let zero = json!({ "amount": "0" });
        assert!(validate(zero.as_object().unwrap()).is_err());
    }
}
