use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::store::{DispatchStore, Recipient};
use super::DispatchError;
use crate::database::models::{ScheduledMessage, ScheduledStatus};

pub struct PgDispatchStore {
    pool: PgPool,
}

impl PgDispatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DispatchStore for PgDispatchStore {
    async fn recover_stale(&self, grace: Duration) -> Result<u64, DispatchError> {
        let result = sqlx::query(
            "UPDATE scheduled_messages SET status = 'pending', claimed_at = NULL \
             WHERE status = 'processing' \
               AND coalesce(claimed_at, updated_at) < now() - make_interval(secs => $1)",
        )
        .bind(grace.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, DispatchError> {
        Ok(sqlx::query_as::<_, ScheduledMessage>(
            "SELECT * FROM scheduled_messages WHERE status = 'pending' AND scheduled_at <= $1 \
             ORDER BY scheduled_at, created_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn claim(&self, id: Uuid) -> Result<bool, DispatchError> {
        let result = sqlx::query(
            "UPDATE scheduled_messages SET status = 'processing', claimed_at = now() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn recipients(&self, message: &ScheduledMessage) -> Result<Vec<Recipient>, DispatchError> {
        let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
            "SELECT p.id, p.name, p.phone \
             FROM unnest($1::uuid[]) WITH ORDINALITY AS wanted(id, position) \
             JOIN patients p ON p.id = wanted.id AND p.clinic_id = $2 \
             WHERE btrim(p.phone) <> '' \
             ORDER BY wanted.position",
        )
        .bind(&message.patient_ids)
        .bind(message.clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(patient_id, name, phone)| Recipient { patient_id, name, phone })
            .collect())
    }

    async fn set_recipient_count(&self, id: Uuid, count: usize) -> Result<(), DispatchError> {
        sqlx::query("UPDATE scheduled_messages SET recipient_count = $2 WHERE id = $1")
            .bind(id)
            .bind(count as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_progress(&self, id: Uuid, sent: usize, failed: usize, last_error: Option<&str>) -> Result<(), DispatchError> {
        sqlx::query(
            "UPDATE scheduled_messages \
             SET sent_count = $2, failed_count = $3, last_error = coalesce($4, last_error), claimed_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(sent as i32)
        .bind(failed as i32)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(&self, id: Uuid, status: ScheduledStatus, sent_at: DateTime<Utc>) -> Result<(), DispatchError> {
        sqlx::query("UPDATE scheduled_messages SET status = $2, sent_at = $3, claimed_at = NULL WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(sent_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
