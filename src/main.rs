//! SiteLens - Multi-tenant website uptime monitoring.
//!
//! Probes registered sites on a fixed cadence, classifies every response,
//! keeps incremental per-site statistics, and sends email alerts and a
//! daily report.

mod alert;
mod breaker;
mod config;
mod db;
mod probe;
mod rating;
mod retry;
mod scheduler;
mod stats;
mod web;

use config::Config;
use db::Store;
use scheduler::Monitor;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sitelens=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting SiteLens on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let http_port = cfg.http_port;
    let monitor = Monitor::new(cfg, store)?;
    monitor.start()?;

    // Drain alerts and back up stats on the first ctrl-c; exit on the
    // second if the first is still in flight.
    let shutdown_monitor = monitor.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if shutdown_monitor.is_shutting_down() {
                tracing::warn!("forced exit");
                std::process::exit(1);
            }
            let monitor = shutdown_monitor.clone();
            tokio::spawn(async move {
                monitor.shutdown().await;
                std::process::exit(0);
            });
        }
    });

    // Start web server
    let server = Server::new(http_port, monitor);
    server.start().await?;

    Ok(())
}
