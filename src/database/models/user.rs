use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub role: String,
    pub permissions: serde_json::Value,
    pub is_active: bool,
    pub external_identity_id: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }

    pub fn is_clinic_owner(&self) -> bool {
        self.role() == Some(Role::ClinicOwner)
    }
}

impl TenantModel for User {
    const TABLE: &'static str = "users";
    const WRITABLE: &'static [&'static str] = &[
        "email",
        "first_name",
        "last_name",
        "name",
        "role",
        "permissions",
        "is_active",
        "external_identity_id",
        "avatar_url",
        "password_hash",
        "created_by",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ClinicOwner,
    Doctor,
    Receptionist,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::ClinicOwner, Role::Doctor, Role::Receptionist];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ClinicOwner => "clinic_owner",
            Role::Doctor => "doctor",
            Role::Receptionist => "receptionist",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clinic_owner" => Ok(Role::ClinicOwner),
            "doctor" => Ok(Role::Doctor),
            "receptionist" => Ok(Role::Receptionist),
            other => Err(other.to_string()),
        }
    }
}
