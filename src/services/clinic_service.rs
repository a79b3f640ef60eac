use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{strip_system_fields, to_fields, unique_as_duplicate, ServiceError};
use crate::auth::service::default_permissions;
use crate::authz::PolicyManager;
use crate::database::models::{Clinic, Role, User};
use crate::database::TenantRepository;

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct NewClinic {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gst_number: Option<String>,
    pub specialization: Option<String>,
    pub timings: Option<Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
}

pub struct ClinicService {
    pool: PgPool,
    repo: TenantRepository<Clinic>,
    policy: Arc<PolicyManager>,
}

impl ClinicService {
    pub fn new(pool: PgPool, policy: Arc<PolicyManager>) -> Self {
        Self {
            repo: TenantRepository::new(pool.clone()),
            pool,
            policy,
        }
    }

    /// Create a clinic and make the caller its owner
    pub async fn onboard(&self, user: &User, input: NewClinic) -> Result<(Clinic, User), ServiceError> {
        if user.clinic_id.is_some() {
            return Err(ServiceError::InvalidState("User already belongs to a clinic".to_string()));
        }
        if input.name.trim().is_empty() {
            return Err(ServiceError::validation("name", "Clinic name is required"));
        }
        validate_location(input.latitude, input.longitude)?;

        let mut fields = to_fields(&input)?;
        fields.insert("name".into(), Value::String(input.name.trim().to_string()));

        let mut tx = self.pool.begin().await?;

        let clash: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM clinics WHERE lower(name) = lower($1) OR (gst_number IS NOT NULL AND gst_number = $2) LIMIT 1",
        )
        .bind(input.name.trim())
        .bind(input.gst_number.as_deref())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((name,)) = clash {
            return Err(if name.eq_ignore_ascii_case(input.name.trim()) {
                ServiceError::duplicate("name", "A clinic with this name already exists")
            } else {
                ServiceError::duplicate("gst_number", "A clinic with this GST number already exists")
            });
        }

        // clinics are scoped by their own id; the placeholder is ignored on insert
        let clinic = self
            .repo
            .create_in(&mut *tx, Uuid::nil(), fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "name", "A clinic with this name already exists"))?;

        let owner = sqlx::query_as::<_, User>(
            "UPDATE users SET clinic_id = $2, role = $3, permissions = $4 WHERE id = $1 RETURNING *",
        )
        .bind(user.id)
        .bind(clinic.id)
        .bind(Role::ClinicOwner.as_str())
        .bind(default_permissions(Role::ClinicOwner))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        // the owner safety net keeps the clinic usable if this write fails
        if let Err(e) = self
            .policy
            .replace_role(&owner.id.to_string(), Role::ClinicOwner.as_str(), &clinic.id.to_string())
            .await
        {
            warn!(clinic_id = %clinic.id, user_id = %owner.id, "Failed to record owner role: {}", e);
        }

        info!(clinic_id = %clinic.id, user_id = %owner.id, "Onboarded clinic");
        Ok((clinic, owner))
    }

    pub async fn get(&self, clinic_id: Uuid) -> Result<Clinic, ServiceError> {
        self.repo
            .get_by_id(clinic_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Clinic".to_string()))
    }

    pub async fn update(&self, clinic_id: Uuid, fields: Map<String, Value>) -> Result<Clinic, ServiceError> {
        let fields = strip_system_fields(fields);
        if let Some(name) = fields.get("name") {
            if name.as_str().map(|n| n.trim().is_empty()).unwrap_or(true) {
                return Err(ServiceError::validation("name", "Clinic name is required"));
            }
        }
        if let Some(status) = fields.get("status").and_then(Value::as_str) {
            if !["active", "suspended"].contains(&status) {
                return Err(ServiceError::validation("status", "status must be active or suspended"));
            }
        }
        validate_location(
            fields.get("latitude").and_then(Value::as_f64),
            fields.get("longitude").and_then(Value::as_f64),
        )?;

        self.repo
            .update(clinic_id, clinic_id, fields)
            .await
            .map_err(|e| unique_as_duplicate(e, "name", "Clinic name or GST number is already in use"))
    }

    /// Refused while any active clinic owner remains attached to the clinic
    pub async fn delete(&self, clinic_id: Uuid) -> Result<(), ServiceError> {
        let (owners,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE clinic_id = $1 AND role = 'clinic_owner' AND is_active",
        )
        .bind(clinic_id)
        .fetch_one(&self.pool)
        .await?;
        if owners > 0 {
            return Err(ServiceError::Blocked(format!(
                "Cannot delete clinic while it has {} active clinic owner(s)",
                owners
            )));
        }
        self.repo.delete(clinic_id, clinic_id).await?;
        info!(clinic_id = %clinic_id, "Deleted clinic");
        Ok(())
    }
}

fn validate_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), ServiceError> {
    if let Some(lat) = latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ServiceError::validation("latitude", "latitude must be between -90 and 90"));
        }
    }
    if let Some(lon) = longitude {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ServiceError::validation("longitude", "longitude must be between -180 and 180"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_bounds_are_checked() {
        assert!(validate_location(Some(12.97), Some(77.59)).is_ok());
        assert!(validate_location(None, None).is_ok());
        assert!(matches!(
            validate_location(Some(95.0), Some(0.0)),
            Err(ServiceError::Validation { field, .. }) if field == "latitude"
        ));
    }
}
