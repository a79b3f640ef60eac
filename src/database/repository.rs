use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::manager::DatabaseError;

/// A clinic-scoped table with a fixed set of caller-writable columns
pub trait TenantModel: for<'r> FromRow<'r, PgRow> + Send + Unpin + Serialize {
    const TABLE: &'static str;
    /// Columns callers may set on create/update; id, clinic_id and sync bookkeeping are excluded
    const WRITABLE: &'static [&'static str];
    /// Column carrying the tenant; `id` for the clinics table itself
    const SCOPE_COLUMN: &'static str = "clinic_id";
}

pub struct TenantRepository<T> {
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: TenantModel> TenantRepository<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Unscoped lookup; callers assert the clinic themselves
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<T>, DatabaseError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", T::TABLE);
        Ok(sqlx::query_as::<_, T>(&sql).bind(id).fetch_optional(&self.pool).await?)
    }

    /// Lookup that treats a row from another clinic exactly like a missing row
    pub async fn get_in_clinic(&self, clinic_id: Uuid, id: Uuid) -> Result<T, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.get_in_clinic_in(&mut conn, clinic_id, id).await
    }

    pub async fn get_in_clinic_in(
        &self,
        conn: &mut PgConnection,
        clinic_id: Uuid,
        id: Uuid,
    ) -> Result<T, DatabaseError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1 AND {} = $2", T::TABLE, T::SCOPE_COLUMN);
        sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .bind(clinic_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} {} not found", T::TABLE, id)))
    }

    /// Page through a clinic's rows in insertion order
    pub async fn get_by_clinic(&self, clinic_id: Uuid, offset: i64, limit: i64) -> Result<Vec<T>, DatabaseError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1 ORDER BY created_at ASC, id ASC OFFSET $2 LIMIT $3",
            T::TABLE,
            T::SCOPE_COLUMN
        );
        Ok(sqlx::query_as::<_, T>(&sql)
            .bind(clinic_id)
            .bind(offset.max(0))
            .bind(limit.clamp(1, 1000))
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn create(&self, clinic_id: Uuid, fields: Map<String, Value>) -> Result<T, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.create_in(&mut conn, clinic_id, fields).await
    }

    /// Insert only the supplied columns so the table defaults fill the rest
    pub async fn create_in(
        &self,
        conn: &mut PgConnection,
        clinic_id: Uuid,
        mut fields: Map<String, Value>,
    ) -> Result<T, DatabaseError> {
        let mut columns = Self::writable_columns(&fields)?;
        if T::SCOPE_COLUMN != "id" {
            fields.insert(T::SCOPE_COLUMN.to_string(), Value::String(clinic_id.to_string()));
            columns.push(T::SCOPE_COLUMN.to_string());
        }
        let column_list = columns.join(", ");

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {table} ({cols}) SELECT {cols} FROM json_populate_record(NULL::{table}, ",
            table = T::TABLE,
            cols = column_list
        ));
        qb.push_bind(Value::Object(fields));
        qb.push("::json) RETURNING *");

        Ok(qb.build_query_as::<T>().fetch_one(&mut *conn).await?)
    }

    pub async fn update(&self, clinic_id: Uuid, id: Uuid, fields: Map<String, Value>) -> Result<T, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.update_in(&mut conn, clinic_id, id, fields).await
    }

    /// Partial update; keys absent from `fields` keep their stored values
    pub async fn update_in(
        &self,
        conn: &mut PgConnection,
        clinic_id: Uuid,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<T, DatabaseError> {
        let columns = Self::writable_columns(&fields)?;
        if columns.is_empty() {
            return self.get_in_clinic_in(conn, clinic_id, id).await;
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("UPDATE {} AS t SET ", T::TABLE));
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(format!("{col} = r.{col}", col = column));
        }
        qb.push(format!(" FROM json_populate_record(NULL::{}, ", T::TABLE));
        qb.push_bind(Value::Object(fields));
        qb.push("::json) AS r WHERE t.id = ");
        qb.push_bind(id);
        qb.push(format!(" AND t.{} = ", T::SCOPE_COLUMN));
        qb.push_bind(clinic_id);
        qb.push(" RETURNING t.*");

        qb.build_query_as::<T>()
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} {} not found", T::TABLE, id)))
    }

    pub async fn delete(&self, clinic_id: Uuid, id: Uuid) -> Result<(), DatabaseError> {
        let sql = format!("DELETE FROM {} WHERE id = $1 AND {} = $2", T::TABLE, T::SCOPE_COLUMN);
        let result = sqlx::query(&sql).bind(id).bind(clinic_id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("{} {} not found", T::TABLE, id)));
        }
        Ok(())
    }

    /// Exact-match lookup on one writable column within a clinic
    pub async fn find_one_by(&self, clinic_id: Uuid, column: &str, value: &str) -> Result<Option<T>, DatabaseError> {
        if !T::WRITABLE.contains(&column) {
            return Err(DatabaseError::InvalidColumn(column.to_string()));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1 AND {} = $2 LIMIT 1",
            T::TABLE,
            T::SCOPE_COLUMN,
            column
        );
        Ok(sqlx::query_as::<_, T>(&sql)
            .bind(clinic_id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_by_phone(&self, clinic_id: Uuid, phone: &str) -> Result<Option<T>, DatabaseError> {
        self.find_one_by(clinic_id, "phone", phone).await
    }

    pub async fn get_by_invoice_number(&self, clinic_id: Uuid, number: &str) -> Result<Option<T>, DatabaseError> {
        self.find_one_by(clinic_id, "invoice_number", number).await
    }

    /// Rows in the clinic whose reference `column` points at `value`
    pub async fn count_where(&self, clinic_id: Uuid, column: &str, value: Uuid) -> Result<i64, DatabaseError> {
        if !T::WRITABLE.contains(&column) {
            return Err(DatabaseError::InvalidColumn(column.to_string()));
        }
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = $1 AND {} = $2", T::TABLE, T::SCOPE_COLUMN, column);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(clinic_id)
            .bind(value)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    fn writable_columns(fields: &Map<String, Value>) -> Result<Vec<String>, DatabaseError> {
        let mut columns = Vec::with_capacity(fields.len());
        for key in fields.keys() {
            if !T::WRITABLE.contains(&key.as_str()) {
                return Err(DatabaseError::InvalidColumn(key.clone()));
            }
            columns.push(key.clone());
        }
        Ok(columns)
    }
}

/// Email is globally unique, so this helper is not clinic-scoped
pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<crate::database::models::User>, DatabaseError> {
    Ok(sqlx::query_as::<_, crate::database::models::User>(
        "SELECT * FROM users WHERE lower(email) = lower($1)",
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Patient;
    use serde_json::json;

    #[test]
    fn rejects_columns_outside_the_writable_set() {
        let fields = json!({ "name": "Asha", "clinic_id": "x" });
        let err = TenantRepository::<Patient>::writable_columns(fields.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidColumn(c) if c == "clinic_id"));
    }

    #[test]
    fn accepts_known_columns() {
        let fields = json!({ "name": "Asha", "phone": "9876543210" });
        let cols = TenantRepository::<Patient>::writable_columns(fields.as_object().unwrap()).unwrap();
        assert_eq!(cols.len(), 2);
    }
}
