use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::{utils, OutputFormat};
use crate::config;
use crate::whatsapp::{worker, SessionManager, SessionSettings, WebDriverLauncher};

pub async fn handle(port: Option<u16>, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config::config();
    if config.whatsapp.worker_token.is_none() {
        warn!("WHATSAPP_WORKER_TOKEN is not set; the worker accepts unauthenticated requests");
    }

    let launcher = WebDriverLauncher::from_config(&config.whatsapp)?;
    let manager = Arc::new(SessionManager::new(
        Arc::new(launcher),
        SessionSettings::from_config(&config.whatsapp),
    ));
    let router = worker::router(manager.clone(), config.whatsapp.worker_token.clone());

    let bind_addr = format!("0.0.0.0:{}", port.unwrap_or(config.server.worker_port));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("WhatsApp worker listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("worker server")?;

    manager.shutdown().await;
    utils::output_success(&output_format, "WhatsApp worker stopped", None)
}
