use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::repository::TenantModel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub content: String,
    pub category: Option<String>,
    pub variables: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantModel for MessageTemplate {
    const TABLE: &'static str = "message_templates";
    const WRITABLE: &'static [&'static str] = &["name", "content", "category", "variables", "is_active"];
}
