use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clinic_backend::app::app;
use clinic_backend::auth::{HttpIdentityVerifier, TokenService};
use clinic_backend::authz::{PgPolicyStore, PolicyManager};
use clinic_backend::config;
use clinic_backend::database::DatabaseManager;
use clinic_backend::dispatcher::{DispatchSettings, Dispatcher, PgDispatchStore};
use clinic_backend::state::AppState;
use clinic_backend::sync::{PgSyncStore, SyncEngine, SyncLocks};
use clinic_backend::whatsapp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    info!("Starting clinic API in {:?} mode", config.environment);

    let db = DatabaseManager::connect_lazy(&config.database)?;

    // A database that is down at boot leaves the policy empty; /permissions/reload fills it later
    let policy_store = Arc::new(PgPolicyStore::new(db.local().clone()));
    let policy = match PolicyManager::init(policy_store.clone()).await {
        Ok(policy) => policy,
        Err(e) => {
            warn!("Policy not loaded at startup: {}", e);
            PolicyManager::new(policy_store)
        }
    };

    let tokens = Arc::new(TokenService::from_config(&config.security)?);
    let verifier = Arc::new(HttpIdentityVerifier::from_config(&config.oauth)?);
    let (whatsapp, sessions) = whatsapp::connect(&config.whatsapp)?;

    let sync = if db.has_cloud() {
        let local = Arc::new(PgSyncStore::new(db.local().clone()));
        let cloud = Arc::new(PgSyncStore::new(db.cloud()?.clone()));
        Some(Arc::new(SyncEngine::new(local, cloud, SyncLocks::default())))
    } else {
        info!("No cloud database configured; sync disabled");
        None
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.scheduler.enabled {
        let store = Arc::new(PgDispatchStore::new(db.local().clone()));
        let dispatcher = Dispatcher::new(store, whatsapp.clone(), DispatchSettings::from_config(&config.scheduler));
        let stop = stop_rx.clone();
        background.push(tokio::spawn(async move { dispatcher.run(stop).await }));
    }

    if let (Some(engine), true) = (&sync, config.sync.interval_secs > 0) {
        let interval = Duration::from_secs(config.sync.interval_secs);
        background.push(tokio::spawn(engine.clone().run_loop(interval, stop_rx.clone())));
    }

    let state = AppState::new(config, db.clone(), Arc::new(policy), tokens, verifier, whatsapp, sync);
    let router = app(state, &config.security.cors_origins);

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("Clinic API listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server")?;

    info!("Shutting down background workers");
    let _ = stop_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }
    if let Some(sessions) = sessions {
        sessions.shutdown().await;
    }
    db.close_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
