use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

use super::ServiceError;
use crate::database::models::{ScheduledMessage, ScheduledStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub message: String,
    pub scheduled_at: DateTime<Utc>,
    pub patient_ids: Vec<Uuid>,
}

/// Reject empty text, past times and empty recipient lists; keeps the listed order
pub fn validate_request(request: &ScheduleRequest, now: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError> {
    if request.message.trim().is_empty() {
        return Err(ServiceError::validation("message", "message is required"));
    }
    if request.scheduled_at <= now {
        return Err(ServiceError::validation("scheduled_at", "scheduled_at must be in the future"));
    }
    let mut seen = BTreeSet::new();
    let ids: Vec<Uuid> = request.patient_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if ids.is_empty() {
        return Err(ServiceError::validation("patient_ids", "At least one patient is required"));
    }
    Ok(ids)
}

pub struct ScheduleService {
    pool: PgPool,
}

impl ScheduleService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn schedule(&self, clinic_id: Uuid, user_id: Uuid, request: ScheduleRequest) -> Result<ScheduledMessage, ServiceError> {
        let ids = validate_request(&request, Utc::now())?;

        let (owned,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patients WHERE clinic_id = $1 AND id = ANY($2)")
            .bind(clinic_id)
            .bind(&ids)
            .fetch_one(&self.pool)
            .await?;
        if owned != ids.len() as i64 {
            return Err(ServiceError::validation("patient_ids", "Some patients do not belong to this clinic"));
        }

        let message = sqlx::query_as::<_, ScheduledMessage>(
            "INSERT INTO scheduled_messages (clinic_id, user_id, message, scheduled_at, patient_ids, recipient_count) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(clinic_id)
        .bind(user_id)
        .bind(request.message.trim())
        .bind(request.scheduled_at)
        .bind(&ids)
        .bind(ids.len() as i32)
        .fetch_one(&self.pool)
        .await?;
        info!(clinic_id = %clinic_id, message_id = %message.id, recipients = ids.len(), "Scheduled message");
        Ok(message)
    }

    pub async fn list(&self, clinic_id: Uuid, status: Option<&str>) -> Result<Vec<ScheduledMessage>, ServiceError> {
        Ok(sqlx::query_as::<_, ScheduledMessage>(
            "SELECT * FROM scheduled_messages WHERE clinic_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY scheduled_at DESC, id",
        )
        .bind(clinic_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Only messages the dispatcher has not claimed can be withdrawn
    pub async fn delete(&self, clinic_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let deleted = sqlx::query("DELETE FROM scheduled_messages WHERE id = $1 AND clinic_id = $2 AND status = $3")
            .bind(id)
            .bind(clinic_id)
            .bind(ScheduledStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 1 {
            info!(clinic_id = %clinic_id, message_id = %id, "Deleted scheduled message");
            return Ok(());
        }

        let exists: Option<(String,)> = sqlx::query_as("SELECT status FROM scheduled_messages WHERE id = $1 AND clinic_id = $2")
            .bind(id)
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            None => Err(ServiceError::NotFound("Scheduled message".to_string())),
            Some((status,)) => Err(ServiceError::InvalidState(format!(
                "Only pending messages can be deleted (status: {})",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(at: DateTime<Utc>, ids: Vec<Uuid>) -> ScheduleRequest {
        ScheduleRequest {
            message: "Your report is ready".into(),
            scheduled_at: at,
            patient_ids: ids,
        }
    }

    #[test]
    fn past_and_present_times_are_rejected() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        assert!(matches!(
            validate_request(&request(now, vec![id]), now),
            Err(ServiceError::Validation { field, .. }) if field == "scheduled_at"
        ));
        assert!(validate_request(&request(now - Duration::minutes(1), vec![id]), now).is_err());
        assert!(validate_request(&request(now + Duration::minutes(1), vec![id]), now).is_ok());
    }

    #[test]
    fn duplicate_recipients_collapse_in_order() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ids = validate_request(&request(now + Duration::hours(1), vec![b, a, b]), now).unwrap();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn empty_recipient_list_is_rejected() {
        let now = Utc::now();
        assert!(validate_request(&request(now + Duration::hours(1), vec![]), now).is_err());
    }
}
