use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{utils, OutputFormat};
use crate::config;
use crate::dispatcher::{DispatchSettings, Dispatcher, PgDispatchStore};
use crate::whatsapp;

pub async fn handle(once: bool, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config::config();
    let db = utils::connect(config)?;
    let (client, sessions) = whatsapp::connect(&config.whatsapp)?;

    let store = Arc::new(PgDispatchStore::new(db.local().clone()));
    let dispatcher = Dispatcher::new(store, client, DispatchSettings::from_config(&config.scheduler));
    let (stop_tx, stop_rx) = watch::channel(false);

    let result = if once {
        dispatcher.tick(&stop_rx).await.map(Some)
    } else {
        let loop_handle = tokio::spawn(async move { dispatcher.run(stop_rx).await });
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
        }
        info!("Stopping dispatcher");
        let _ = stop_tx.send(true);
        let _ = loop_handle.await;
        Ok(None)
    };

    if let Some(sessions) = sessions {
        sessions.shutdown().await;
    }
    db.close_all().await;

    match result? {
        Some(summary) => utils::output_report(&output_format, "Dispatch tick finished", &summary),
        None => utils::output_success(&output_format, "Dispatcher stopped", None),
    }
}
