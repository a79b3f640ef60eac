//! Bidirectional last-write-wins replication between the local and the cloud store

mod engine;
mod postgres;
mod store;

pub use engine::{SyncEngine, SyncLocks, SyncOptions};
pub use postgres::PgSyncStore;
pub use store::{ApplyOutcome, ClinicLock, SyncStore, SyncTransaction};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// A replicated table and the column that carries its tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncTable {
    pub name: &'static str,
    #[serde(skip)]
    pub scope_column: &'static str,
}

const fn table(name: &'static str) -> SyncTable {
    SyncTable {
        name,
        scope_column: "clinic_id",
    }
}

/// Parents before children so foreign keys resolve on both sides
pub const SYNC_TABLES: &[SyncTable] = &[
    SyncTable {
        name: "clinics",
        scope_column: "id",
    },
    table("users"),
    table("referring_doctors"),
    table("treatment_types"),
    table("patients"),
    table("appointments"),
    table("reports"),
    table("payments"),
    table("invoices"),
    table("invoice_line_items"),
    table("invoice_audit_logs"),
    table("scheduled_messages"),
    table("attendance"),
];

pub fn find_table(name: &str) -> Result<SyncTable, SyncError> {
    SYNC_TABLES
        .iter()
        .copied()
        .find(|t| t.name == name)
        .ok_or_else(|| SyncError::UnknownTable(name.to_string()))
}

/// One row in transit: key, clock and every column as JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRow {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl SyncRow {
    /// Timestamps compare at millisecond resolution
    pub fn clock(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
}

impl TableReport {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub clinic_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
}

impl SyncReport {
    pub fn totals(&self) -> (usize, usize, usize, usize) {
        self.tables.iter().fold((0, 0, 0, 0), |acc, t| {
            (acc.0 + t.pulled, acc.1 + t.pushed, acc.2 + t.conflicts, acc.3 + t.errors.len())
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub table: &'static str,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub pending: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Cloud database is not configured")]
    CloudNotConfigured,

    #[error("Sync already running for clinic {0}")]
    AlreadyRunning(Uuid),

    #[error("Unknown sync table: {0}")]
    UnknownTable(String),

    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Row {0} belongs to another clinic")]
    ForeignRow(Uuid),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                SyncError::Unreachable(err.to_string())
            }
            other => SyncError::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_precede_children() {
        let pos = |n: &str| SYNC_TABLES.iter().position(|t| t.name == n).unwrap();
        assert_eq!(pos("clinics"), 0);
        assert!(pos("users") < pos("patients"));
        assert!(pos("patients") < pos("appointments"));
        assert!(pos("patients") < pos("payments"));
        assert!(pos("invoices") < pos("invoice_line_items"));
        assert!(pos("invoices") < pos("invoice_audit_logs"));
    }

    #[test]
    fn unknown_tables_are_rejected() {
        assert!(find_table("patients").is_ok());
        assert!(matches!(find_table("policy_rules"), Err(SyncError::UnknownTable(_))));
    }
}
