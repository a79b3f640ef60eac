use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub scheduled_at: DateTime<Utc>,
    pub patient_ids: Vec<Uuid>,
    pub recipient_count: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub status: String,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledStatus {
    Pending,
    Processing,
    Sent,
    Partial,
    Failed,
}

impl ScheduledStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledStatus::Pending => "pending",
            ScheduledStatus::Processing => "processing",
            ScheduledStatus::Sent => "sent",
            ScheduledStatus::Partial => "partial",
            ScheduledStatus::Failed => "failed",
        }
    }

    /// Terminal status for a finished fan-out over `total` reachable recipients
    pub fn from_counts(total: usize, sent: usize, failed: usize) -> Self {
        if total == 0 || sent == 0 {
            ScheduledStatus::Failed
        } else if failed == 0 {
            ScheduledStatus::Sent
        } else {
            ScheduledStatus::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_status_follows_counts() {
        assert_eq!(ScheduledStatus::from_counts(3, 3, 0), ScheduledStatus::Sent);
        assert_eq!(ScheduledStatus::from_counts(3, 2, 1), ScheduledStatus::Partial);
        assert_eq!(ScheduledStatus::from_counts(3, 0, 3), ScheduledStatus::Failed);
        assert_eq!(ScheduledStatus::from_counts(0, 0, 0), ScheduledStatus::Failed);
    }
}
