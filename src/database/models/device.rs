use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub device_serial: String,
    pub device_name: Option<String>,
    pub device_type: String,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<serde_json::Value>,
    pub is_online: bool,
    pub is_active: bool,
    pub allowed_access: serde_json::Value,
    pub enrolled_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDevice {
    /// Missing keys read as allowed
    pub fn allows(&self, device_type: &str) -> bool {
        self.allowed_access
            .get(device_type)
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}
