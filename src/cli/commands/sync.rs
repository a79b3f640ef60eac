use clap::Args;
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::{utils, OutputFormat};
use crate::config;
use crate::sync::{PgSyncStore, SyncEngine, SyncLocks, SyncOptions};

#[derive(Args)]
pub struct SyncArgs {
    #[arg(long, help = "Clinic to reconcile")]
    pub clinic: Uuid,

    #[arg(long, value_delimiter = ',', help = "Only these tables (comma separated)")]
    pub tables: Vec<String>,

    #[arg(long, help = "Ignore watermarks and compare every row")]
    pub full: bool,
}

pub async fn handle(args: SyncArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config::config();
    let db = utils::connect(config)?;

    let local = Arc::new(PgSyncStore::new(db.local().clone()));
    let cloud = Arc::new(PgSyncStore::new(db.cloud()?.clone()));
    let engine = SyncEngine::new(local, cloud, SyncLocks::default());

    let options = SyncOptions {
        tables: Some(args.tables).filter(|t| !t.is_empty()),
        full: args.full,
    };
    let result = engine.run(args.clinic, options).await;
    db.close_all().await;

    let report = result?;
    utils::output_report(&output_format, &format!("Sync finished for clinic {}", args.clinic), &report)
}
