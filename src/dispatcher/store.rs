use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::DispatchError;
use crate::database::models::{ScheduledMessage, ScheduledStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub patient_id: Uuid,
    pub name: String,
    pub phone: String,
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Put `processing` rows whose last heartbeat is older than `grace` back to `pending`
    async fn recover_stale(&self, grace: Duration) -> Result<u64, DispatchError>;

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, DispatchError>;

    /// `pending -> processing`; false when another worker got there first
    async fn claim(&self, id: Uuid) -> Result<bool, DispatchError>;

    /// In-tenant patients with a phone, in the order they were listed
    async fn recipients(&self, message: &ScheduledMessage) -> Result<Vec<Recipient>, DispatchError>;

    async fn set_recipient_count(&self, id: Uuid, count: usize) -> Result<(), DispatchError>;

    /// Persist counters after each send; also refreshes the claim heartbeat
    async fn record_progress(&self, id: Uuid, sent: usize, failed: usize, last_error: Option<&str>) -> Result<(), DispatchError>;

    async fn finish(&self, id: Uuid, status: ScheduledStatus, sent_at: DateTime<Utc>) -> Result<(), DispatchError>;
}
