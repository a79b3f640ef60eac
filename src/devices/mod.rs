//! Device registry: which devices a user signs in from, and whether a device
//! class may be used for login at all.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::UserDevice;
use crate::database::DatabaseError;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Access from {0} devices is not allowed")]
    AccessDenied(DeviceType),

    #[error("Device not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for DeviceError {
    fn from(err: sqlx::Error) -> Self {
        DeviceError::Database(err.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Web,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::Desktop, DeviceType::Mobile, DeviceType::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Web => "web",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(DeviceType::Desktop),
            "mobile" => Ok(DeviceType::Mobile),
            "web" => Ok(DeviceType::Web),
            other => Err(other.to_string()),
        }
    }
}

/// Device description supplied by the client or derived from the user agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub device_serial: String,
    pub device_type: DeviceType,
    pub device_name: Option<String>,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<Value>,
}

impl DeviceInfo {
    /// Infer type and platform from user-agent keywords; serial is a stable digest of the agent
    pub fn detect(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();

        let device_type = if ["mobile", "android", "iphone"].iter().any(|k| ua.contains(k)) {
            DeviceType::Mobile
        } else if ua.contains("tauri") || ua.contains("electron") {
            DeviceType::Desktop
        } else {
            DeviceType::Web
        };

        let platform = if ua.contains("android") {
            "Android"
        } else if ua.contains("iphone") || ua.contains("ipad") {
            "iOS"
        } else if ua.contains("windows") {
            "Windows"
        } else if ua.contains("mac os") || ua.contains("macintosh") {
            "macOS"
        } else if ua.contains("linux") {
            "Linux"
        } else {
            "Unknown"
        };

        let digest = format!("{:x}", Sha256::digest(user_agent.as_bytes()));

        Self {
            device_serial: format!("{}_{}", device_type, &digest[..8]),
            device_type,
            device_name: Some(format!("{} {}", platform, device_type)),
            platform: Some(platform.to_string()),
            os_version: None,
            user_agent: Some(user_agent.to_string()),
            ip_address: None,
            location: None,
        }
    }
}

/// Deny only when the user already has devices of this class and every one of them denies it
pub fn access_decision(devices: &[UserDevice], device_type: DeviceType) -> bool {
    let of_type: Vec<&UserDevice> = devices
        .iter()
        .filter(|d| d.device_type == device_type.as_str())
        .collect();

    if of_type.is_empty() {
        return true;
    }
    of_type.iter().any(|d| d.allows(device_type.as_str()))
}

pub fn default_allowed_access() -> Value {
    json!({ "desktop": true, "mobile": true, "web": true })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub device_name: Option<String>,
    pub allowed_access: Option<Value>,
    pub is_active: Option<bool>,
    pub location: Option<Value>,
}

#[derive(Clone)]
pub struct DeviceRegistry {
    pool: PgPool,
}

impl DeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Match on (user_id, device_serial): refresh on hit, enroll with everything allowed on miss
    pub async fn upsert(&self, user_id: Uuid, clinic_id: Option<Uuid>, info: &DeviceInfo) -> Result<UserDevice, DeviceError> {
        let device = sqlx::query_as::<_, UserDevice>(
            r#"
            INSERT INTO user_devices (
                user_id, clinic_id, device_serial, device_name, device_type, platform,
                os_version, user_agent, ip_address, location, is_online, allowed_access,
                enrolled_at, last_seen
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE, $11, now(), now())
            ON CONFLICT (user_id, device_serial) DO UPDATE SET
                clinic_id = COALESCE(EXCLUDED.clinic_id, user_devices.clinic_id),
                is_online = TRUE,
                last_seen = now(),
                user_agent = COALESCE(EXCLUDED.user_agent, user_devices.user_agent),
                ip_address = COALESCE(EXCLUDED.ip_address, user_devices.ip_address),
                location = COALESCE(EXCLUDED.location, user_devices.location),
                os_version = COALESCE(EXCLUDED.os_version, user_devices.os_version)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(clinic_id)
        .bind(&info.device_serial)
        .bind(&info.device_name)
        .bind(info.device_type.as_str())
        .bind(&info.platform)
        .bind(&info.os_version)
        .bind(&info.user_agent)
        .bind(&info.ip_address)
        .bind(&info.location)
        .bind(default_allowed_access())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            "Device {} ({}) seen for user {}",
            device.device_serial,
            device.device_type,
            user_id
        );
        Ok(device)
    }

    pub async fn check_access(&self, user_id: Uuid, device_type: DeviceType) -> Result<(), DeviceError> {
        let devices = self.list_for_user(user_id).await?;
        if access_decision(&devices, device_type) {
            Ok(())
        } else {
            tracing::warn!("Login from {} device denied for user {}", device_type, user_id);
            Err(DeviceError::AccessDenied(device_type))
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserDevice>, DeviceError> {
        Ok(sqlx::query_as::<_, UserDevice>(
            "SELECT * FROM user_devices WHERE user_id = $1 ORDER BY last_seen DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list(&self, clinic_id: Uuid) -> Result<Vec<UserDevice>, DeviceError> {
        Ok(sqlx::query_as::<_, UserDevice>(
            r#"
            SELECT d.* FROM user_devices d
            JOIN users u ON u.id = d.user_id
            WHERE u.clinic_id = $1
            ORDER BY d.last_seen DESC
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Devices belonging to users outside `clinic_id` read as missing
    pub async fn get(&self, clinic_id: Uuid, device_id: Uuid) -> Result<UserDevice, DeviceError> {
        sqlx::query_as::<_, UserDevice>(
            r#"
            SELECT d.* FROM user_devices d
            JOIN users u ON u.id = d.user_id
            WHERE d.id = $1 AND u.clinic_id = $2
            "#,
        )
        .bind(device_id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DeviceError::NotFound)
    }

    pub async fn update(&self, clinic_id: Uuid, device_id: Uuid, update: DeviceUpdate) -> Result<UserDevice, DeviceError> {
        let existing = self.get(clinic_id, device_id).await?;

        // Merge partial access maps over the stored one
        let allowed_access = match update.allowed_access {
            Some(Value::Object(patch)) => {
                let mut merged = existing.allowed_access.as_object().cloned().unwrap_or_default();
                for (key, value) in patch {
                    if DeviceType::from_str(&key).is_ok() && value.is_boolean() {
                        merged.insert(key, value);
                    }
                }
                Value::Object(merged)
            }
            _ => existing.allowed_access.clone(),
        };

        Ok(sqlx::query_as::<_, UserDevice>(
            r#"
            UPDATE user_devices SET
                device_name = COALESCE($2, device_name),
                allowed_access = $3,
                is_active = COALESCE($4, is_active),
                location = COALESCE($5, location)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(update.device_name)
        .bind(allowed_access)
        .bind(update.is_active)
        .bind(update.location)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn delete(&self, clinic_id: Uuid, device_id: Uuid) -> Result<(), DeviceError> {
        self.get(clinic_id, device_id).await?;
        sqlx::query("DELETE FROM user_devices WHERE id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Liveness ping from a signed-in client
    pub async fn heartbeat(&self, user_id: Uuid, device_serial: &str) -> Result<UserDevice, DeviceError> {
        sqlx::query_as::<_, UserDevice>(
            r#"
            UPDATE user_devices SET is_online = TRUE, last_seen = $3
            WHERE user_id = $1 AND device_serial = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(device_serial)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DeviceError::NotFound)
    }
}
