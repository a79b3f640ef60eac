use tracing::info;

use crate::cli::{utils, OutputFormat};
use crate::config;
use crate::database::DatabaseManager;

pub async fn handle(cloud: bool, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config::config();
    let db = utils::connect(config)?;

    info!("Migrating local database {}", DatabaseManager::redact(&config.database.url));
    DatabaseManager::migrate(db.local()).await?;

    if cloud {
        let pool = db.cloud()?;
        info!("Migrating cloud database");
        DatabaseManager::migrate(pool).await?;
    }
    db.close_all().await;

    let target = if cloud { "local and cloud databases" } else { "local database" };
    utils::output_success(&output_format, &format!("Migrations applied to the {}", target), None)
}
