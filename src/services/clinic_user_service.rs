use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::ServiceError;
use crate::auth::service::default_permissions;
use crate::auth::hash_password;
use crate::authz::PolicyManager;
use crate::database::models::{Role, User};
use crate::database::repository::get_by_email;
use crate::database::TenantRepository;

#[derive(Debug, Clone, Deserialize)]
pub struct NewClinicUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClinicUserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

/// Staff accounts inside one clinic
pub struct ClinicUserService {
    pool: PgPool,
    repo: TenantRepository<User>,
    policy: Arc<PolicyManager>,
    min_password_length: usize,
}

impl ClinicUserService {
    pub fn new(pool: PgPool, policy: Arc<PolicyManager>, min_password_length: usize) -> Self {
        Self {
            repo: TenantRepository::new(pool.clone()),
            pool,
            policy,
            min_password_length,
        }
    }

    pub async fn list(&self, clinic_id: Uuid, offset: i64, limit: i64) -> Result<Vec<User>, ServiceError> {
        Ok(self.repo.get_by_clinic(clinic_id, offset, limit).await?)
    }

    pub async fn get(&self, clinic_id: Uuid, user_id: Uuid) -> Result<User, ServiceError> {
        self.repo
            .get_in_clinic(clinic_id, user_id)
            .await
            .map_err(|_| ServiceError::NotFound("User".to_string()))
    }

    /// Owners add doctors and receptionists with an initial password
    pub async fn create(&self, clinic_id: Uuid, actor: Uuid, input: NewClinicUser) -> Result<User, ServiceError> {
        let role = staff_role(&input.role)?;
        let email = input.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(ServiceError::validation("email", "A valid email is required"));
        }
        if input.password.chars().count() < self.min_password_length {
            return Err(ServiceError::validation(
                "password",
                format!("Password must be at least {} characters", self.min_password_length),
            ));
        }
        if get_by_email(&self.pool, &email).await?.is_some() {
            return Err(ServiceError::duplicate("email", "Email is already registered"));
        }

        let hash = hash_password(&input.password)?;
        let name = format!("{} {}", input.first_name.trim(), input.last_name.trim()).trim().to_string();
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (clinic_id, email, first_name, last_name, name, role, permissions, password_hash, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(clinic_id)
        .bind(&email)
        .bind(input.first_name.trim())
        .bind(input.last_name.trim())
        .bind(&name)
        .bind(role.as_str())
        .bind(default_permissions(role))
        .bind(&hash)
        .bind(actor)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ServiceError::duplicate("email", "Email is already registered")
            }
            other => other.into(),
        })?;

        self.policy
            .assign_role(&user.id.to_string(), role.as_str(), &clinic_id.to_string())
            .await?;
        info!(clinic_id = %clinic_id, user_id = %user.id, role = %role, "Created clinic user");
        Ok(user)
    }

    /// Role changes swap the policy role atomically
    pub async fn update(
        &self,
        clinic_id: Uuid,
        actor: Uuid,
        user_id: Uuid,
        update: ClinicUserUpdate,
    ) -> Result<User, ServiceError> {
        let existing = self.get(clinic_id, user_id).await?;
        let role = match update.role.as_deref() {
            Some(r) => Some(r.parse::<Role>().map_err(|r| ServiceError::validation("role", format!("Unknown role '{}'", r)))?),
            None => None,
        };
        if actor == user_id && (role.is_some_and(|r| r != Role::ClinicOwner) || update.is_active == Some(false)) && existing.is_clinic_owner() {
            return Err(ServiceError::InvalidState("You cannot demote or deactivate yourself".to_string()));
        }

        let first = update.first_name.map(|s| s.trim().to_string()).unwrap_or(existing.first_name.clone());
        let last = update.last_name.map(|s| s.trim().to_string()).unwrap_or(existing.last_name.clone());
        let name = format!("{} {}", first, last).trim().to_string();
        let role_str = role.map(|r| r.as_str().to_string()).unwrap_or(existing.role.clone());
        let permissions = match role {
            Some(r) => default_permissions(r),
            None => existing.permissions.clone(),
        };

        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET first_name = $3, last_name = $4, name = $5, role = $6, permissions = $7, \
             is_active = COALESCE($8, is_active) WHERE id = $1 AND clinic_id = $2 RETURNING *",
        )
        .bind(user_id)
        .bind(clinic_id)
        .bind(&first)
        .bind(&last)
        .bind(&name)
        .bind(&role_str)
        .bind(permissions)
        .bind(update.is_active)
        .fetch_one(&self.pool)
        .await?;

        if let Some(role) = role {
            self.policy
                .replace_role(&user_id.to_string(), role.as_str(), &clinic_id.to_string())
                .await?;
        }
        info!(clinic_id = %clinic_id, user_id = %user_id, "Updated clinic user");
        Ok(user)
    }

    /// Users are deactivated rather than removed so their history stays attributable
    pub async fn deactivate(&self, clinic_id: Uuid, actor: Uuid, user_id: Uuid) -> Result<User, ServiceError> {
        if actor == user_id {
            return Err(ServiceError::InvalidState("You cannot deactivate yourself".to_string()));
        }
        self.get(clinic_id, user_id).await?;
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET is_active = FALSE WHERE id = $1 AND clinic_id = $2 RETURNING *",
        )
        .bind(user_id)
        .bind(clinic_id)
        .fetch_one(&self.pool)
        .await?;
        info!(clinic_id = %clinic_id, user_id = %user_id, "Deactivated clinic user");
        Ok(user)
    }
}

fn staff_role(role: &str) -> Result<Role, ServiceError> {
    match role.parse::<Role>() {
        Ok(Role::ClinicOwner) => Err(ServiceError::validation(
            "role",
            "Clinic owners are created through clinic onboarding",
        )),
        Ok(role) => Ok(role),
        Err(other) => Err(ServiceError::validation("role", format!("Unknown role '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_exclude_owner() {
        assert_eq!(staff_role("doctor").unwrap(), Role::Doctor);
        assert_eq!(staff_role("receptionist").unwrap(), Role::Receptionist);
        assert!(staff_role("clinic_owner").is_err());
        assert!(staff_role("admin").is_err());
    }
}
