use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::{optional_text, optional_uuid, strip_system_fields, ServiceError};
use crate::database::models::{Appointment, AppointmentStatus, Patient};
use crate::database::TenantRepository;

pub struct AppointmentService {
    pool: PgPool,
    repo: TenantRepository<Appointment>,
}

fn validate_status(fields: &Map<String, Value>) -> Result<(), ServiceError> {
    if let Some(status) = fields.get("status") {
        status
            .as_str()
            .ok_or_else(|| ServiceError::validation("status", "status must be a string"))?
            .parse::<AppointmentStatus>()
            .map_err(|s| ServiceError::validation("status", format!("Unknown appointment status '{}'", s)))?;
    }
    Ok(())
}

/// Wall-clock `HH:MM` strings
fn validate_time(fields: &Map<String, Value>, field: &str) -> Result<(), ServiceError> {
    if let Some(value) = fields.get(field) {
        let ok = value
            .as_str()
            .map(|t| chrono::NaiveTime::parse_from_str(t, "%H:%M").is_ok())
            .unwrap_or(false);
        if !ok {
            return Err(ServiceError::validation(field, format!("{} must be HH:MM", field)));
        }
    }
    Ok(())
}

fn validate_date(fields: &Map<String, Value>) -> Result<(), ServiceError> {
    if let Some(value) = fields.get("appointment_date") {
        let ok = value
            .as_str()
            .map(|d| d.parse::<DateTime<Utc>>().is_ok() || NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok())
            .unwrap_or(false);
        if !ok {
            return Err(ServiceError::validation("appointment_date", "appointment_date must be a date"));
        }
    }
    Ok(())
}

impl AppointmentService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: TenantRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn list(
        &self,
        clinic_id: Uuid,
        date: Option<NaiveDate>,
        status: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Appointment>, ServiceError> {
        if let Some(s) = status {
            s.parse::<AppointmentStatus>()
                .map_err(|s| ServiceError::validation("status", format!("Unknown appointment status '{}'", s)))?;
        }
        Ok(sqlx::query_as::<_, Appointment>(
            "SELECT * FROM appointments WHERE clinic_id = $1 \
             AND ($2::date IS NULL OR appointment_date::date = $2) \
             AND ($3::text IS NULL OR status = $3) \
             ORDER BY appointment_date, start_time, id OFFSET $4 LIMIT $5",
        )
        .bind(clinic_id)
        .bind(date)
        .bind(status)
        .bind(offset.max(0))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get(&self, clinic_id: Uuid, id: Uuid) -> Result<Appointment, ServiceError> {
        self.repo
            .get_in_clinic(clinic_id, id)
            .await
            .map_err(|_| ServiceError::NotFound("Appointment".to_string()))
    }

    async fn check_doctor(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<(), ServiceError> {
        let (ok,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND clinic_id = $2 AND is_active)",
        )
        .bind(doctor_id)
        .bind(clinic_id)
        .fetch_one(&self.pool)
        .await?;
        if !ok {
            return Err(ServiceError::validation("doctor_id", "Doctor not found in this clinic"));
        }
        Ok(())
    }

    /// Visits are numbered per patient inside the insert transaction
    pub async fn create(&self, clinic_id: Uuid, actor: Uuid, fields: Map<String, Value>) -> Result<Appointment, ServiceError> {
        let mut fields = strip_system_fields(fields);
        fields.remove("visit_number");
        validate_status(&fields)?;
        validate_time(&fields, "start_time")?;
        validate_time(&fields, "end_time")?;
        validate_date(&fields)?;
        if !fields.contains_key("appointment_date") {
            return Err(ServiceError::validation("appointment_date", "appointment_date is required"));
        }
        if let Some(doctor_id) = optional_uuid(&fields, "doctor_id")? {
            self.check_doctor(clinic_id, doctor_id).await?;
        }
        fields.insert("created_by".into(), Value::String(actor.to_string()));

        let patient_id = optional_uuid(&fields, "patient_id")?;
        let mut tx = self.pool.begin().await?;

        match patient_id {
            Some(patient_id) => {
                let patient = sqlx::query_as::<_, Patient>(
                    "SELECT * FROM patients WHERE id = $1 AND clinic_id = $2 FOR UPDATE",
                )
                .bind(patient_id)
                .bind(clinic_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ServiceError::validation("patient_id", "Patient not found in this clinic"))?;

                let (visit,): (i32,) = sqlx::query_as(
                    "SELECT COALESCE(MAX(visit_number), 0) + 1 FROM appointments WHERE patient_id = $1",
                )
                .bind(patient_id)
                .fetch_one(&mut *tx)
                .await?;

                fields.insert("visit_number".into(), Value::from(visit));
                fields.entry("patient_name").or_insert(Value::String(patient.name));
                fields.entry("patient_phone").or_insert(Value::String(patient.phone));
            }
            None => {
                if optional_text(&fields, "patient_name")?.is_none() {
                    return Err(ServiceError::validation("patient_name", "Walk-in appointments need a patient name"));
                }
            }
        }

        let appointment = self.repo.create_in(&mut tx, clinic_id, fields).await?;
        tx.commit().await?;
        info!(clinic_id = %clinic_id, appointment_id = %appointment.id, "Created appointment");
        Ok(appointment)
    }

    pub async fn update(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<Appointment, ServiceError> {
        let mut fields = strip_system_fields(fields);
        fields.remove("visit_number");
        fields.remove("patient_id");
        validate_status(&fields)?;
        validate_time(&fields, "start_time")?;
        validate_time(&fields, "end_time")?;
        validate_date(&fields)?;
        if let Some(doctor_id) = optional_uuid(&fields, "doctor_id")? {
            self.check_doctor(clinic_id, doctor_id).await?;
        }
        self.get(clinic_id, id).await?;
        Ok(self.repo.update(clinic_id, id, fields).await?)
    }

    pub async fn delete(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.get(clinic_id, id).await?;
        Ok(self.repo.delete(clinic_id, id).await?)
    }
}
