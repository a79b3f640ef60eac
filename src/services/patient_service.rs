use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::invoice_service::{create_draft_in, LineItemDraft};
use super::{optional_uuid, strip_system_fields, to_fields, unique_as_duplicate, ServiceError};
use crate::database::models::{Invoice, Patient, Payment, Report, TreatmentType};
use crate::database::{TenantModel, TenantRepository};

const GENDERS: &[&str] = &["Male", "Female", "Other"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewPatient {
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub village: String,
    pub phone: String,
    pub referred_by: Option<String>,
    pub referring_doctor_id: Option<Uuid>,
    pub treatment_type: String,
    pub notes: Option<String>,
    pub payment_type: Option<String>,
    pub dental_chart: Option<Value>,
    pub tooth_notes: Option<Value>,
    pub treatment_plan: Option<Value>,
    pub prescriptions: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPatient {
    #[serde(flatten)]
    pub patient: Patient,
    pub invoice: Option<Invoice>,
}

pub struct PatientService {
    pool: PgPool,
    repo: TenantRepository<Patient>,
    payments: TenantRepository<Payment>,
    reports: TenantRepository<Report>,
}

/// Phone numbers are compared on digits only
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn validate_new(input: &NewPatient) -> Result<(), ServiceError> {
    if input.name.trim().is_empty() {
        return Err(ServiceError::validation("name", "name is required"));
    }
    if !(0..=150).contains(&input.age) {
        return Err(ServiceError::validation("age", "age must be between 0 and 150"));
    }
    if !GENDERS.contains(&input.gender.as_str()) {
        return Err(ServiceError::validation("gender", "gender must be Male, Female or Other"));
    }
    if input.village.trim().is_empty() {
        return Err(ServiceError::validation("village", "village is required"));
    }
    if normalize_phone(&input.phone).len() < 10 {
        return Err(ServiceError::validation("phone", "phone must have at least 10 digits"));
    }
    if input.treatment_type.trim().is_empty() {
        return Err(ServiceError::validation("treatment_type", "treatment_type is required"));
    }
    Ok(())
}

impl PatientService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: TenantRepository::new(pool.clone()),
            payments: TenantRepository::new(pool.clone()),
            reports: TenantRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn list(&self, clinic_id: Uuid, search: Option<&str>, offset: i64, limit: i64) -> Result<Vec<Patient>, ServiceError> {
        match search.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(self.repo.get_by_clinic(clinic_id, offset, limit).await?),
            Some(term) => Ok(sqlx::query_as::<_, Patient>(
                "SELECT * FROM patients WHERE clinic_id = $1 AND (name ILIKE $2 OR phone LIKE $2) \
                 ORDER BY created_at, id OFFSET $3 LIMIT $4",
            )
            .bind(clinic_id)
            .bind(format!("%{}%", term))
            .bind(offset.max(0))
            .bind(limit.clamp(1, 1000))
            .fetch_all(&self.pool)
            .await?),
        }
    }

    pub async fn get(&self, clinic_id: Uuid, id: Uuid) -> Result<Patient, ServiceError> {
        self.repo
            .get_in_clinic(clinic_id, id)
            .await
            .map_err(|_| ServiceError::NotFound("Patient".to_string()))
    }

    async fn active_treatment(&self, clinic_id: Uuid, name: &str) -> Result<Option<TreatmentType>, ServiceError> {
        Ok(sqlx::query_as::<_, TreatmentType>(
            "SELECT * FROM treatment_types WHERE clinic_id = $1 AND lower(name) = lower($2) AND is_active LIMIT 1",
        )
        .bind(clinic_id)
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn has_catalog(&self, clinic_id: Uuid) -> Result<bool, ServiceError> {
        let (any,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM treatment_types WHERE clinic_id = $1 AND is_active)")
                .bind(clinic_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(any)
    }

    async fn check_referring_doctor(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let (ok,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM referring_doctors WHERE id = $1 AND clinic_id = $2 AND is_active)",
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_one(&self.pool)
        .await?;
        if !ok {
            return Err(ServiceError::validation("referring_doctor_id", "Referring doctor not found in this clinic"));
        }
        Ok(())
    }

    async fn check_phone_free(&self, clinic_id: Uuid, phone: &str, exclude: Option<Uuid>) -> Result<(), ServiceError> {
        if let Some(existing) = self.repo.get_by_phone(clinic_id, phone).await? {
            if Some(existing.id) != exclude {
                return Err(ServiceError::duplicate("phone", "A patient with this phone number already exists"));
            }
        }
        Ok(())
    }

    /// Insert the patient and its opening draft invoice in one transaction
    pub async fn create(&self, clinic_id: Uuid, actor: Uuid, mut input: NewPatient) -> Result<CreatedPatient, ServiceError> {
        validate_new(&input)?;
        input.phone = normalize_phone(&input.phone);
        self.check_phone_free(clinic_id, &input.phone, None).await?;

        let treatment = self.active_treatment(clinic_id, &input.treatment_type).await?;
        if treatment.is_none() && self.has_catalog(clinic_id).await? {
            return Err(ServiceError::validation(
                "treatment_type",
                format!("Unknown treatment type '{}'", input.treatment_type),
            ));
        }
        if let Some(doctor_id) = input.referring_doctor_id {
            self.check_referring_doctor(clinic_id, doctor_id).await?;
        }

        let mut fields = to_fields(&input)?;
        fields.insert("created_by".into(), Value::String(actor.to_string()));

        let mut tx = self.pool.begin().await?;
        let patient = self
            .repo
            .create_in(&mut tx, clinic_id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "phone", "A patient with this phone number already exists"))?;

        let invoice = match &treatment {
            Some(t) => {
                let items = [LineItemDraft {
                    description: t.name.clone(),
                    quantity: 1,
                    unit_price: t.price,
                    treatment_type_id: Some(t.id),
                }];
                Some(create_draft_in(&mut tx, clinic_id, patient.id, Some(actor), &items, Decimal::ZERO, None).await?)
            }
            None => None,
        };
        tx.commit().await?;

        info!(clinic_id = %clinic_id, patient_id = %patient.id, "Created patient");
        Ok(CreatedPatient { patient, invoice })
    }

    pub async fn update(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<Patient, ServiceError> {
        let mut fields = strip_system_fields(fields);
        self.get(clinic_id, id).await?;

        if let Some(phone) = fields.get("phone") {
            let phone = phone
                .as_str()
                .map(normalize_phone)
                .filter(|p| p.len() >= 10)
                .ok_or_else(|| ServiceError::validation("phone", "phone must have at least 10 digits"))?;
            self.check_phone_free(clinic_id, &phone, Some(id)).await?;
            fields.insert("phone".into(), Value::String(phone));
        }
        if let Some(gender) = fields.get("gender") {
            if !gender.as_str().map(|g| GENDERS.contains(&g)).unwrap_or(false) {
                return Err(ServiceError::validation("gender", "gender must be Male, Female or Other"));
            }
        }
        if let Some(name) = fields.get("treatment_type").and_then(Value::as_str) {
            if self.active_treatment(clinic_id, name).await?.is_none() && self.has_catalog(clinic_id).await? {
                return Err(ServiceError::validation("treatment_type", format!("Unknown treatment type '{}'", name)));
            }
        }
        if let Some(doctor_id) = optional_uuid(&fields, "referring_doctor_id")? {
            self.check_referring_doctor(clinic_id, doctor_id).await?;
        }

        self.repo
            .update(clinic_id, id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "phone", "A patient with this phone number already exists"))
    }

    /// Reports filed against the patient, newest first
    pub async fn reports(&self, clinic_id: Uuid, id: Uuid) -> Result<Vec<Report>, ServiceError> {
        self.get(clinic_id, id).await?;
        let sql = format!(
            "SELECT * FROM {} WHERE clinic_id = $1 AND patient_id = $2 ORDER BY created_at DESC",
            Report::TABLE
        );
        let reports = sqlx::query_as::<_, Report>(&sql)
            .bind(clinic_id)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(reports)
    }

    /// Refused while payments or reports reference the patient
    pub async fn delete(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.get(clinic_id, id).await?;
        let payments = self.payments.count_where(clinic_id, "patient_id", id).await?;
        let reports = self.reports.count_where(clinic_id, "patient_id", id).await?;
        if payments > 0 || reports > 0 {
            return Err(ServiceError::Blocked(format!(
                "Cannot delete patient with {} payment(s) and {} report(s)",
                payments, reports
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM invoices WHERE patient_id = $1 AND clinic_id = $2 AND status IN ('draft', 'cancelled')")
            .bind(id)
            .bind(clinic_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM patients WHERE id = $1 AND clinic_id = $2")
            .bind(id)
            .bind(clinic_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    ServiceError::Blocked("Patient has paid invoices and cannot be deleted".to_string())
                }
                other => other.into(),
            })?;
        tx.commit().await?;
        info!(clinic_id = %clinic_id, patient_id = %id, "Deleted patient");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewPatient {
        NewPatient {
            name: "Asha".into(),
            age: 34,
            gender: "Female".into(),
            village: "Hosur".into(),
            phone: "98765 43210".into(),
            referred_by: None,
            referring_doctor_id: None,
            treatment_type: "Scaling".into(),
            notes: None,
            payment_type: None,
            dental_chart: None,
            tooth_notes: None,
            treatment_plan: None,
            prescriptions: None,
        }
    }

    #[test]
    fn phone_is_reduced_to_digits() {
        assert_eq!(normalize_phone("+91 (987) 654-3210"), "919876543210");
    }

    #[test]
    fn valid_patient_passes() {
        assert!(validate_new(&sample()).is_ok());
    }

    #[test]
    fn bad_fields_are_named() {
        let mut p = sample();
        p.gender = "unknown".into();
        assert!(matches!(validate_new(&p), Err(ServiceError::Validation { field, .. }) if field == "gender"));

        let mut p = sample();
        p.phone = "12345".into();
        assert!(matches!(validate_new(&p), Err(ServiceError::Validation { field, .. }) if field == "phone"));
    }
}
