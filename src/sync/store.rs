use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{SyncError, SyncRow, SyncTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The target already holds a newer version
    Stale,
}

/// Held for the duration of one clinic's sync run
#[async_trait]
pub trait ClinicLock: Send {
    async fn release(self: Box<Self>);
}

/// One side of the replication (local or cloud)
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Open a transaction scoped to one table; replicated timestamps are kept as-is inside it
    async fn begin(&self, table: SyncTable) -> Result<Box<dyn SyncTransaction>, SyncError>;

    /// Cross-process guard; `None` when another run holds it
    async fn lock_clinic(&self, clinic_id: Uuid) -> Result<Option<Box<dyn ClinicLock>>, SyncError>;

    /// Clinics eligible for the background loop
    async fn active_clinics(&self) -> Result<Vec<Uuid>, SyncError>;
}

#[async_trait]
pub trait SyncTransaction: Send {
    /// `max(synced_at)` for the clinic's rows
    async fn watermark(&mut self, clinic_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError>;

    /// Rows updated after `since` (all rows when `None`), oldest first
    async fn changed_since(&mut self, clinic_id: Uuid, since: Option<DateTime<Utc>>) -> Result<Vec<SyncRow>, SyncError>;

    /// Rows never synced or edited since their last sync, oldest first
    async fn pending_push(&mut self, clinic_id: Uuid) -> Result<Vec<SyncRow>, SyncError>;

    async fn find(&mut self, id: Uuid) -> Result<Option<SyncRow>, SyncError>;

    /// Upsert on id without touching id or the tenant column, stamping it synced at `synced_at`.
    /// A failing row must leave the rest of the transaction usable.
    async fn apply(&mut self, row: &SyncRow, synced_at: DateTime<Utc>) -> Result<ApplyOutcome, SyncError>;

    async fn mark_synced(&mut self, ids: &[Uuid], synced_at: DateTime<Utc>) -> Result<(), SyncError>;

    async fn commit(self: Box<Self>) -> Result<(), SyncError>;

    async fn rollback(self: Box<Self>) -> Result<(), SyncError>;
}
