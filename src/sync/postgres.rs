use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, Connection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::store::{ApplyOutcome, ClinicLock, SyncStore, SyncTransaction};
use super::{SyncError, SyncRow, SyncTable};

/// Replication endpoint backed by a Postgres pool; used for both stores
#[derive(Clone)]
pub struct PgSyncStore {
    pool: PgPool,
}

impl PgSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Advisory lock keys are 64-bit; fold the clinic uuid into one
pub fn advisory_key(clinic_id: Uuid) -> i64 {
    let (hi, lo) = clinic_id.as_u64_pair();
    (hi ^ lo) as i64
}

struct PgClinicLock {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ClinicLock for PgClinicLock {
    async fn release(self: Box<Self>) {
        // the xact lock ends with the transaction
        if let Err(e) = self.tx.rollback().await {
            tracing::warn!("Failed to release sync lock: {}", e);
        }
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn begin(&self, table: SyncTable) -> Result<Box<dyn SyncTransaction>, SyncError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('clinic.sync_apply', 'on', true)")
            .execute(&mut *tx)
            .await?;

        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position",
        )
        .bind(table.name)
        .fetch_all(&mut *tx)
        .await?;
        if columns.is_empty() {
            return Err(SyncError::UnknownTable(table.name.to_string()));
        }

        Ok(Box::new(PgSyncTransaction { tx, table, columns }))
    }

    async fn lock_clinic(&self, clinic_id: Uuid) -> Result<Option<Box<dyn ClinicLock>>, SyncError> {
        let mut tx = self.pool.begin().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(advisory_key(clinic_id))
            .fetch_one(&mut *tx)
            .await?;
        if !acquired {
            tx.rollback().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(PgClinicLock { tx })))
    }

    async fn active_clinics(&self) -> Result<Vec<Uuid>, SyncError> {
        Ok(sqlx::query_scalar("SELECT id FROM clinics WHERE status = 'active' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }
}

struct PgSyncTransaction {
    tx: Transaction<'static, Postgres>,
    table: SyncTable,
    columns: Vec<String>,
}

fn decode_row(row: PgRow) -> Result<SyncRow, SyncError> {
    let id: Uuid = row.try_get("id")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let fields: Value = row.try_get("fields")?;
    match fields {
        Value::Object(fields) => Ok(SyncRow { id, updated_at, fields }),
        other => Err(SyncError::MalformedRow(format!("{}: expected object, got {}", id, other))),
    }
}

impl PgSyncTransaction {
    fn select(&self) -> String {
        format!(
            "SELECT t.id, t.updated_at, row_to_json(t)::jsonb AS fields FROM {} AS t",
            self.table.name
        )
    }
}

/// `INSERT ... ON CONFLICT (id) DO UPDATE` over every column except id and the tenant column.
/// The clock guard compares at millisecond resolution, the same as `SyncRow::clock`.
fn upsert_sql(table: SyncTable, columns: &[String]) -> String {
    let t = table.name;
    let scope = table.scope_column;
    let assignments = columns
        .iter()
        .filter(|c| c.as_str() != "id" && c.as_str() != scope)
        .map(|c| format!("{c} = EXCLUDED.{c}", c = c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {t} SELECT * FROM json_populate_record(NULL::{t}, $1::json) \
         ON CONFLICT (id) DO UPDATE SET {assignments} \
         WHERE {t}.{scope} = EXCLUDED.{scope} \
         AND date_trunc('milliseconds', {t}.updated_at) <= date_trunc('milliseconds', EXCLUDED.updated_at)",
        t = t,
        scope = scope,
        assignments = assignments
    )
}

#[async_trait]
impl SyncTransaction for PgSyncTransaction {
    async fn watermark(&mut self, clinic_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        let sql = format!(
            "SELECT max(synced_at) FROM {} WHERE {} = $1",
            self.table.name, self.table.scope_column
        );
        Ok(sqlx::query_scalar(&sql).bind(clinic_id).fetch_one(&mut *self.tx).await?)
    }

    async fn changed_since(&mut self, clinic_id: Uuid, since: Option<DateTime<Utc>>) -> Result<Vec<SyncRow>, SyncError> {
        let sql = format!(
            "{} WHERE t.{} = $1 AND ($2::timestamptz IS NULL OR t.updated_at > $2) ORDER BY t.updated_at, t.id",
            self.select(),
            self.table.scope_column
        );
        sqlx::query(&sql)
            .bind(clinic_id)
            .bind(since)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(decode_row)
            .collect()
    }

    async fn pending_push(&mut self, clinic_id: Uuid) -> Result<Vec<SyncRow>, SyncError> {
        let sql = format!(
            "{} WHERE t.{} = $1 AND (t.synced_at IS NULL OR t.updated_at > t.synced_at) ORDER BY t.updated_at, t.id",
            self.select(),
            self.table.scope_column
        );
        sqlx::query(&sql)
            .bind(clinic_id)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(decode_row)
            .collect()
    }

    async fn find(&mut self, id: Uuid) -> Result<Option<SyncRow>, SyncError> {
        let sql = format!("{} WHERE t.id = $1", self.select());
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(decode_row)
            .transpose()
    }

    async fn apply(&mut self, row: &SyncRow, synced_at: DateTime<Utc>) -> Result<ApplyOutcome, SyncError> {
        let mut fields = row.fields.clone();
        fields.insert("synced_at".into(), Value::String(synced_at.to_rfc3339()));
        fields.insert("sync_status".into(), Value::String("synced".into()));
        let scope_value = fields.get(self.table.scope_column).cloned().unwrap_or(Value::Null);

        let upsert = upsert_sql(self.table, &self.columns);
        let mut savepoint = Connection::begin(&mut *self.tx).await?;
        let affected = match sqlx::query(&upsert)
            .bind(Value::Object(fields))
            .execute(&mut *savepoint)
            .await
        {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                savepoint.rollback().await?;
                return Err(e.into());
            }
        };
        savepoint.commit().await?;

        if affected > 0 {
            return Ok(ApplyOutcome::Applied);
        }

        let sql = format!(
            "SELECT {}::text FROM {} WHERE id = $1",
            self.table.scope_column, self.table.name
        );
        let owner: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(row.id)
            .fetch_optional(&mut *self.tx)
            .await?;
        match (owner.flatten(), scope_value.as_str()) {
            (Some(owner), Some(incoming)) if owner == incoming => Ok(ApplyOutcome::Stale),
            _ => Err(SyncError::ForeignRow(row.id)),
        }
    }

    async fn mark_synced(&mut self, ids: &[Uuid], synced_at: DateTime<Utc>) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE {} SET synced_at = $2, sync_status = 'synced' WHERE id = ANY($1)",
            self.table.name
        );
        sqlx::query(&sql)
            .bind(ids)
            .bind(synced_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SyncError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SyncError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_key_is_stable_per_clinic() {
        let id = Uuid::new_v4();
        assert_eq!(advisory_key(id), advisory_key(id));
        assert_ne!(advisory_key(id), advisory_key(Uuid::new_v4()));
    }

    #[test]
    fn upsert_keeps_key_columns_and_guards_at_millisecond_resolution() {
        let table = crate::sync::find_table("patients").unwrap();
        let columns: Vec<String> = ["id", "clinic_id", "name", "updated_at"].iter().map(|c| c.to_string()).collect();
        let sql = upsert_sql(table, &columns);

        assert!(sql.contains("SET name = EXCLUDED.name, updated_at = EXCLUDED.updated_at WHERE"));
        assert!(!sql.contains("id = EXCLUDED.id,"));
        assert!(!sql.contains("clinic_id = EXCLUDED.clinic_id,"));
        assert!(sql.contains(
            "date_trunc('milliseconds', patients.updated_at) <= date_trunc('milliseconds', EXCLUDED.updated_at)"
        ));
    }
}
