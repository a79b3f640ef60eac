use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use super::policy::{PolicyKind, PolicyRule};
use super::PolicyError;

/// Persistence for policy tuples; the manager keeps the in-memory view
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load(&self) -> Result<Vec<PolicyRule>, PolicyError>;

    async fn insert(&self, rules: &[PolicyRule]) -> Result<(), PolicyError>;

    async fn remove(&self, rule: &PolicyRule) -> Result<(), PolicyError>;

    /// Remove every role `user` holds in `domain` and assign `role`, atomically
    async fn replace_role(&self, user: &str, domain: &str, role: &str) -> Result<(), PolicyError>;
}

#[derive(FromRow)]
struct PolicyRow {
    ptype: String,
    v0: String,
    v1: String,
    v2: String,
    v3: String,
}

impl PolicyRow {
    fn into_rule(self) -> Option<PolicyRule> {
        let kind = match self.ptype.as_str() {
            "p" => PolicyKind::Grant,
            "g" => PolicyKind::Role,
            _ => return None,
        };
        Some(PolicyRule {
            kind,
            v0: self.v0,
            v1: self.v1,
            v2: self.v2,
            v3: self.v3,
        })
    }
}

/// Policy tuples in the `policy_rules` table of the local database
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn load(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        let rows: Vec<PolicyRow> =
            sqlx::query_as("SELECT ptype, v0, v1, v2, v3 FROM policy_rules ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().filter_map(PolicyRow::into_rule).collect())
    }

    async fn insert(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let mut tx = self.pool.begin().await?;
        for rule in rules {
            sqlx::query(
                "INSERT INTO policy_rules (ptype, v0, v1, v2, v3) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(rule.kind.as_str())
            .bind(&rule.v0)
            .bind(&rule.v1)
            .bind(&rule.v2)
            .bind(&rule.v3)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, rule: &PolicyRule) -> Result<(), PolicyError> {
        sqlx::query(
            "DELETE FROM policy_rules WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4 AND v3 = $5",
        )
        .bind(rule.kind.as_str())
        .bind(&rule.v0)
        .bind(&rule.v1)
        .bind(&rule.v2)
        .bind(&rule.v3)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_role(&self, user: &str, domain: &str, role: &str) -> Result<(), PolicyError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM policy_rules WHERE ptype = 'g' AND v0 = $1 AND v2 = $2")
            .bind(user)
            .bind(domain)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO policy_rules (ptype, v0, v1, v2, v3) VALUES ('g', $1, $2, $3, '')")
            .bind(user)
            .bind(role)
            .bind(domain)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
