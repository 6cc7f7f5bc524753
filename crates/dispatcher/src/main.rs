mod config;
mod delivery;
mod sweeps;
mod webhook;

use anyhow::Result;
use std::path::Path;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizhub_dispatcher=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        error!("Dispatcher fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    info!("quizhub-dispatcher starting");

    let cfg = config::load_config()?;
    let db = quizhub_db::init_db(Path::new(&cfg.database.data_dir))?;
    info!("database opened at {}", cfg.database.data_dir);

    if cfg.webhook.url.is_empty() {
        info!("No webhook configured, notifications stay in-app");
    } else {
        info!("Webhook delivery enabled: {}", cfg.webhook.url);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let delivery_handle = tokio::spawn(delivery::run_delivery(
        db.clone(),
        cfg.clone(),
        shutdown_rx.clone(),
    ));
    let expiry_handle = tokio::spawn(sweeps::run_expiry(
        db.clone(),
        cfg.dispatcher.expiry_interval_secs,
        shutdown_rx.clone(),
    ));
    let reminder_handle = tokio::spawn(sweeps::run_reminders(
        db,
        cfg.dispatcher.reminder_interval_secs,
        shutdown_rx,
    ));

    wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    let _ = delivery_handle.await;
    let _ = expiry_handle.await;
    let _ = reminder_handle.await;

    info!("quizhub-dispatcher stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
