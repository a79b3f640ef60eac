use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{ApplyOutcome, SyncStore, SyncTransaction};
use super::{find_table, SyncError, SyncReport, SyncTable, TableReport, TableStatus, SYNC_TABLES};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Restrict the run to these tables; dependency order is kept
    pub tables: Option<Vec<String>>,
    /// Ignore the watermark and pull every cloud row of the clinic
    pub full: bool,
}

/// In-process guard so one clinic never has two runs in flight
#[derive(Clone, Default)]
pub struct SyncLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SyncLocks {
    pub fn try_acquire(&self, clinic_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(clinic_id).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }
}

pub struct SyncEngine {
    local: Arc<dyn SyncStore>,
    cloud: Arc<dyn SyncStore>,
    locks: SyncLocks,
}

impl SyncEngine {
    pub fn new(local: Arc<dyn SyncStore>, cloud: Arc<dyn SyncStore>, locks: SyncLocks) -> Self {
        Self { local, cloud, locks }
    }

    fn resolve_tables(options: &SyncOptions) -> Result<Vec<SyncTable>, SyncError> {
        match &options.tables {
            None => Ok(SYNC_TABLES.to_vec()),
            Some(names) => {
                for name in names {
                    find_table(name)?;
                }
                Ok(SYNC_TABLES
                    .iter()
                    .copied()
                    .filter(|t| names.iter().any(|n| n == t.name))
                    .collect())
            }
        }
    }

    /// One full cycle for a clinic. Table failures land in the report, never in the result.
    pub async fn run(&self, clinic_id: Uuid, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let tables = Self::resolve_tables(&options)?;
        let _guard = self
            .locks
            .try_acquire(clinic_id)
            .ok_or(SyncError::AlreadyRunning(clinic_id))?;
        let lock = self
            .local
            .lock_clinic(clinic_id)
            .await?
            .ok_or(SyncError::AlreadyRunning(clinic_id))?;

        let started_at = Utc::now();
        info!("Sync started for clinic {} ({} tables)", clinic_id, tables.len());

        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            reports.push(self.sync_table(clinic_id, table, started_at, options.full).await);
        }
        lock.release().await;

        let report = SyncReport {
            clinic_id,
            started_at,
            finished_at: Utc::now(),
            tables: reports,
        };
        let (pulled, pushed, conflicts, errors) = report.totals();
        info!(
            "Sync finished for clinic {}: pulled={} pushed={} conflicts={} errors={}",
            clinic_id, pulled, pushed, conflicts, errors
        );
        Ok(report)
    }

    async fn sync_table(&self, clinic_id: Uuid, table: SyncTable, synced_at: DateTime<Utc>, full: bool) -> TableReport {
        let mut report = TableReport::new(table.name);
        if let Err(e) = self.try_sync_table(clinic_id, table, synced_at, full, &mut report).await {
            warn!("Sync of {} for clinic {} rolled back: {}", table.name, clinic_id, e);
            report.pulled = 0;
            report.pushed = 0;
            report.errors.push(e.to_string());
        }
        report
    }

    async fn try_sync_table(
        &self,
        clinic_id: Uuid,
        table: SyncTable,
        synced_at: DateTime<Utc>,
        full: bool,
        report: &mut TableReport,
    ) -> Result<(), SyncError> {
        let mut local = self.local.begin(table).await?;
        let mut cloud = match self.cloud.begin(table).await {
            Ok(tx) => tx,
            Err(e) => {
                let _ = local.rollback().await;
                return Err(e);
            }
        };

        if let Err(e) = reconcile(local.as_mut(), cloud.as_mut(), clinic_id, synced_at, full, report).await {
            let _ = cloud.rollback().await;
            let _ = local.rollback().await;
            return Err(e);
        }

        // cloud first: if local then fails, the pushed rows stay pending and replay idempotently
        if let Err(e) = cloud.commit().await {
            let _ = local.rollback().await;
            return Err(e);
        }
        local.commit().await
    }

    /// Watermark and pending push count for every table of the clinic
    pub async fn status(&self, clinic_id: Uuid) -> Result<Vec<TableStatus>, SyncError> {
        let mut statuses = Vec::with_capacity(SYNC_TABLES.len());
        for table in SYNC_TABLES {
            let mut tx = self.local.begin(*table).await?;
            let last_synced_at = tx.watermark(clinic_id).await?;
            let pending = tx.pending_push(clinic_id).await?.len();
            tx.rollback().await?;
            statuses.push(TableStatus {
                table: table.name,
                last_synced_at,
                pending,
            });
        }
        Ok(statuses)
    }

    /// Sync every active clinic each `interval` until `stop` flips to true
    pub async fn run_loop(self: Arc<Self>, interval: Duration, mut stop: watch::Receiver<bool>) {
        info!("Background sync every {:?}", interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }

            let clinics = match self.local.active_clinics().await {
                Ok(clinics) => clinics,
                Err(e) => {
                    warn!("Background sync could not list clinics: {}", e);
                    continue;
                }
            };
            for clinic_id in clinics {
                match self.run(clinic_id, SyncOptions::default()).await {
                    Ok(_) => {}
                    Err(SyncError::AlreadyRunning(_)) => debug!("Sync for clinic {} already running", clinic_id),
                    Err(e) => warn!("Background sync failed for clinic {}: {}", clinic_id, e),
                }
            }
        }
        info!("Background sync stopped");
    }
}

async fn reconcile(
    local: &mut dyn SyncTransaction,
    cloud: &mut dyn SyncTransaction,
    clinic_id: Uuid,
    synced_at: DateTime<Utc>,
    full: bool,
    report: &mut TableReport,
) -> Result<(), SyncError> {
    let since = if full { None } else { local.watermark(clinic_id).await? };
    let incoming = cloud.changed_since(clinic_id, since).await?;
    let outgoing = local.pending_push(clinic_id).await?;

    let mut pulled = HashSet::new();
    for row in incoming {
        let current = match local.find(row.id).await {
            Ok(current) => current,
            Err(e) => {
                row_error(report, row.id, &e);
                continue;
            }
        };
        match current {
            Some(existing) if existing.clock() > row.clock() => {
                report.conflicts += 1;
                continue;
            }
            Some(existing) if existing.clock() == row.clock() => continue,
            _ => {}
        }
        match local.apply(&row, synced_at).await {
            Ok(ApplyOutcome::Applied) => {
                report.pulled += 1;
                pulled.insert(row.id);
            }
            Ok(ApplyOutcome::Stale) => report.conflicts += 1,
            Err(e) => row_error(report, row.id, &e),
        }
    }

    let mut pushed = Vec::new();
    for row in outgoing.into_iter().filter(|r| !pulled.contains(&r.id)) {
        match cloud.apply(&row, synced_at).await {
            Ok(ApplyOutcome::Applied) => pushed.push(row.id),
            // cloud holds a newer version the watermark skipped; take it instead of pushing
            Ok(ApplyOutcome::Stale) => match adopt_cloud_row(local, cloud, row.id, synced_at).await {
                Ok(true) => report.pulled += 1,
                Ok(false) => report.conflicts += 1,
                Err(e) => row_error(report, row.id, &e),
            },
            Err(e) => row_error(report, row.id, &e),
        }
    }
    local.mark_synced(&pushed, synced_at).await?;
    report.pushed = pushed.len();
    Ok(())
}

async fn adopt_cloud_row(
    local: &mut dyn SyncTransaction,
    cloud: &mut dyn SyncTransaction,
    id: Uuid,
    synced_at: DateTime<Utc>,
) -> Result<bool, SyncError> {
    let Some(winner) = cloud.find(id).await? else {
        return Ok(false);
    };
    Ok(local.apply(&winner, synced_at).await? == ApplyOutcome::Applied)
}

fn row_error(report: &mut TableReport, id: Uuid, err: &SyncError) {
    warn!("Sync row {}.{} failed: {}", report.table, id, err);
    report.errors.push(format!("{}: {}", id, err));
}
