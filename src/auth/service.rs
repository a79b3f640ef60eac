use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::oauth::IdentityVerifier;
use super::password::{hash_password, verify_password, PasswordCheck};
use super::token::TokenService;
use super::AuthError;
use crate::authz::default_role_grants;
use crate::database::models::{Role, User, UserDevice};
use crate::database::repository::get_by_email;
use crate::devices::{DeviceInfo, DeviceRegistry};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: User,
    pub device: Option<UserDevice>,
}

/// Permission map stored on the user row, derived from the role's default grants
pub fn default_permissions(role: Role) -> Value {
    let grants = match default_role_grants() {
        Ok(grants) => grants,
        Err(e) => {
            warn!("Default policy unavailable, user gets empty permissions: {}", e);
            return Value::Object(Map::new());
        }
    };
    let map: Map<String, Value> = grants
        .get(role.as_str())
        .map(|resources| {
            resources
                .iter()
                .map(|(resource, actions)| (resource.clone(), Value::from(actions.clone())))
                .collect()
        })
        .unwrap_or_default();
    Value::Object(map)
}

pub struct AuthService {
    pool: PgPool,
    tokens: Arc<TokenService>,
    devices: DeviceRegistry,
    min_password_length: usize,
}

impl AuthService {
    pub fn new(pool: PgPool, tokens: Arc<TokenService>, min_password_length: usize) -> Self {
        Self {
            devices: DeviceRegistry::new(pool.clone()),
            pool,
            tokens,
            min_password_length,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    fn check_password_strength(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.min_password_length {
            return Err(AuthError::WeakPassword(self.min_password_length));
        }
        Ok(())
    }

    pub fn issue_tokens(&self, user_id: Uuid) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.tokens.issue_access_token(user_id)?,
            refresh_token: self.tokens.issue_refresh_token(user_id)?,
            token_type: "bearer",
            expires_in: self.tokens.access_ttl_secs(),
        })
    }

    async fn insert_user(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
        role: Role,
        password_hash: Option<String>,
        external_identity_id: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, AuthError> {
        let name = format!("{} {}", first_name, last_name).trim().to_string();
        let result = sqlx::query_as::<_, User>(
            "INSERT INTO users (email, first_name, last_name, name, role, permissions, password_hash, \
             external_identity_id, avatar_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(&name)
        .bind(role.as_str())
        .bind(default_permissions(role))
        .bind(password_hash)
        .bind(external_identity_id)
        .bind(avatar_url)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AuthError::EmailTaken(email.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a password account; clinic assignment happens at onboarding
    pub async fn register(&self, request: RegisterRequest) -> Result<User, AuthError> {
        let email = request.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AuthError::InvalidEmail(email));
        }
        self.check_password_strength(&request.password)?;
        let role = match request.role.as_deref() {
            Some(r) => r
                .parse::<Role>()
                .map_err(AuthError::InvalidRole)?,
            None => Role::ClinicOwner,
        };

        if get_by_email(&self.pool, &email).await?.is_some() {
            return Err(AuthError::EmailTaken(email));
        }

        let hash = hash_password(&request.password)?;
        let user = self
            .insert_user(&email, request.first_name.trim(), request.last_name.trim(), role, Some(hash), None, None)
            .await?;
        info!(user_id = %user.id, role = %role, "Registered user");
        Ok(user)
    }

    /// Verify credentials; OAuth-only accounts are reported as `PasswordNotSet`
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = get_by_email(&self.pool, email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let stored = match user.password_hash.as_deref() {
            Some(hash) if !hash.is_empty() => hash.to_string(),
            _ => return Err(AuthError::PasswordNotSet),
        };

        let check = verify_password(password, &stored)?;
        if !check.is_valid() {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        if check == PasswordCheck::ValidNeedsRehash {
            match hash_password(password) {
                Ok(upgraded) => {
                    if let Err(e) = self.store_password_hash(user.id, &upgraded).await {
                        warn!(user_id = %user.id, "Failed to upgrade legacy password hash: {}", e);
                    } else {
                        info!(user_id = %user.id, "Upgraded legacy password hash");
                    }
                }
                Err(e) => warn!(user_id = %user.id, "Failed to rehash legacy password: {}", e),
            }
        }

        Ok(user)
    }

    /// Password login gated by the device registry
    pub async fn login(&self, email: &str, password: &str, device: Option<DeviceInfo>) -> Result<LoginOutcome, AuthError> {
        let user = self.authenticate(email, password).await?;

        let device = match device {
            Some(info) => {
                self.devices.check_access(user.id, info.device_type).await?;
                Some(self.devices.upsert(user.id, user.clinic_id, &info).await?)
            }
            None => None,
        };

        let tokens = self.issue_tokens(user.id)?;
        info!(user_id = %user.id, "User logged in");
        Ok(LoginOutcome { tokens, user, device })
    }

    /// Sign in with an external identity, linking or creating the local user
    pub async fn handle_oauth(
        &self,
        verifier: &dyn IdentityVerifier,
        id_token: &str,
        role_hint: Option<&str>,
    ) -> Result<User, AuthError> {
        let identity = verifier.verify(id_token).await?;
        let email = identity.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AuthError::IdentityRejected("Identity has no email".to_string()));
        }

        if let Some(existing) = get_by_email(&self.pool, &email).await? {
            if !existing.is_active {
                return Err(AuthError::UserInactive);
            }
            let user = sqlx::query_as::<_, User>(
                "UPDATE users SET external_identity_id = $2, avatar_url = COALESCE($3, avatar_url) \
                 WHERE id = $1 RETURNING *",
            )
            .bind(existing.id)
            .bind(&identity.uid)
            .bind(identity.picture.as_deref())
            .fetch_one(&self.pool)
            .await?;
            info!(user_id = %user.id, "Linked external identity");
            return Ok(user);
        }

        let role = role_hint
            .and_then(|r| r.parse::<Role>().ok())
            .unwrap_or(Role::ClinicOwner);
        let display = identity.name.clone().unwrap_or_default();
        let (first, last) = match display.trim().split_once(' ') {
            Some((f, l)) => (f.to_string(), l.trim().to_string()),
            None => (display.trim().to_string(), String::new()),
        };
        let user = self
            .insert_user(&email, &first, &last, role, None, Some(&identity.uid), identity.picture.as_deref())
            .await?;
        info!(user_id = %user.id, role = %role, "Created user from external identity");
        Ok(user)
    }

    /// Rotate the password; `current` may be omitted only when no password exists yet
    pub async fn change_password(&self, user_id: Uuid, current: Option<&str>, new: &str) -> Result<(), AuthError> {
        self.check_password_strength(new)?;
        let user = self.load_user(user_id).await?;

        if let Some(stored) = user.password_hash.as_deref().filter(|h| !h.is_empty()) {
            let current = current.ok_or(AuthError::IncorrectCurrentPassword)?;
            if !verify_password(current, stored)?.is_valid() {
                return Err(AuthError::IncorrectCurrentPassword);
            }
        }

        let hash = hash_password(new)?;
        self.store_password_hash(user_id, &hash).await?;
        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Resolve an access token to an active user
    pub async fn validate(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.tokens.decode_access(token)?;
        let user = self.load_user(claims.user_id).await?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }
        Ok(user)
    }

    /// Exchange a refresh token for a fresh access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let claims = self.tokens.decode_refresh(refresh_token)?;
        let user = self.load_user(claims.user_id).await?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }
        self.tokens.issue_access_token(user.id)
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("User not found".to_string()))
    }

    async fn store_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
