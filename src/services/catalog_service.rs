use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::{require_text, strip_system_fields, ServiceError};
use crate::database::models::{ReferringDoctor, TreatmentType};
use crate::database::TenantRepository;

/// Treatment types and referring doctors; names are unique among a clinic's active entries
pub struct CatalogService {
    pool: PgPool,
    treatments: TenantRepository<TreatmentType>,
    doctors: TenantRepository<ReferringDoctor>,
}

impl CatalogService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            treatments: TenantRepository::new(pool.clone()),
            doctors: TenantRepository::new(pool.clone()),
            pool,
        }
    }

    async fn active_name_taken(
        &self,
        table: &str,
        clinic_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool, ServiceError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE clinic_id = $1 AND lower(name) = lower($2) AND is_active \
             AND ($3::uuid IS NULL OR id <> $3))",
            table
        );
        let (taken,): (bool,) = sqlx::query_as(&sql)
            .bind(clinic_id)
            .bind(name)
            .bind(exclude)
            .fetch_one(&self.pool)
            .await?;
        Ok(taken)
    }

    pub async fn list_treatment_types(&self, clinic_id: Uuid, offset: i64, limit: i64) -> Result<Vec<TreatmentType>, ServiceError> {
        Ok(self.treatments.get_by_clinic(clinic_id, offset, limit).await?)
    }

    pub async fn get_treatment_type(&self, clinic_id: Uuid, id: Uuid) -> Result<TreatmentType, ServiceError> {
        self.treatments
            .get_in_clinic(clinic_id, id)
            .await
            .map_err(|_| ServiceError::NotFound("Treatment type".to_string()))
    }

    pub async fn create_treatment_type(&self, clinic_id: Uuid, fields: Map<String, Value>) -> Result<TreatmentType, ServiceError> {
        let mut fields = strip_system_fields(fields);
        let name = require_text(&fields, "name")?;
        validate_price(&fields)?;
        if !fields.contains_key("price") {
            return Err(ServiceError::validation("price", "price is required"));
        }
        if self.active_name_taken("treatment_types", clinic_id, &name, None).await? {
            return Err(ServiceError::duplicate("name", "A treatment type with this name already exists"));
        }
        fields.insert("name".into(), Value::String(name));
        Ok(self.treatments.create(clinic_id, fields).await?)
    }

    pub async fn update_treatment_type(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<TreatmentType, ServiceError> {
        let fields = strip_system_fields(fields);
        self.get_treatment_type(clinic_id, id).await?;
        validate_price(&fields)?;
        if fields.contains_key("name") {
            let name = require_text(&fields, "name")?;
            if self.active_name_taken("treatment_types", clinic_id, &name, Some(id)).await? {
                return Err(ServiceError::duplicate("name", "A treatment type with this name already exists"));
            }
        }
        Ok(self.treatments.update(clinic_id, id, fields).await?)
    }

    pub async fn delete_treatment_type(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.get_treatment_type(clinic_id, id).await?;
        Ok(self.treatments.delete(clinic_id, id).await?)
    }

    pub async fn list_referring_doctors(&self, clinic_id: Uuid, offset: i64, limit: i64) -> Result<Vec<ReferringDoctor>, ServiceError> {
        Ok(self.doctors.get_by_clinic(clinic_id, offset, limit).await?)
    }

    pub async fn get_referring_doctor(&self, clinic_id: Uuid, id: Uuid) -> Result<ReferringDoctor, ServiceError> {
        self.doctors
            .get_in_clinic(clinic_id, id)
            .await
            .map_err(|_| ServiceError::NotFound("Referring doctor".to_string()))
    }

    pub async fn create_referring_doctor(&self, clinic_id: Uuid, fields: Map<String, Value>) -> Result<ReferringDoctor, ServiceError> {
        let mut fields = strip_system_fields(fields);
        let name = require_text(&fields, "name")?;
        if self.active_name_taken("referring_doctors", clinic_id, &name, None).await? {
            return Err(ServiceError::duplicate("name", "A referring doctor with this name already exists"));
        }
        fields.insert("name".into(), Value::String(name));
        Ok(self.doctors.create(clinic_id, fields).await?)
    }

    pub async fn update_referring_doctor(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<ReferringDoctor, ServiceError> {
        let fields = strip_system_fields(fields);
        self.get_referring_doctor(clinic_id, id).await?;
        if fields.contains_key("name") {
            let name = require_text(&fields, "name")?;
            if self.active_name_taken("referring_doctors", clinic_id, &name, Some(id)).await? {
                return Err(ServiceError::duplicate("name", "A referring doctor with this name already exists"));
            }
        }
        Ok(self.doctors.update(clinic_id, id, fields).await?)
    }

    pub async fn delete_referring_doctor(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.get_referring_doctor(clinic_id, id).await?;
        Ok(self.doctors.delete(clinic_id, id).await?)
    }
}

pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn validate_price(fields: &Map<String, Value>) -> Result<(), ServiceError> {
    match fields.get("price") {
        None => Ok(()),
        Some(v) => match parse_decimal(v) {
            Some(p) if p >= Decimal::ZERO => Ok(()),
            _ => Err(ServiceError::validation("price", "price must be a non-negative number")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prices_accept_numbers_and_strings() {
        assert_eq!(parse_decimal(&json!(2000)), Some(Decimal::from(2000)));
        assert_eq!(parse_decimal(&json!("1499.50")), Some(Decimal::new(149950, 2)));
        assert_eq!(parse_decimal(&json!(true)), None);
    }

    #[test]
    fn negative_price_is_rejected() {
        let fields = json!({ "price": -1 });
        assert!(validate_price(fields.as_object().unwrap()).is_err());
    }
}
