//! Periodic history pruning: drops probe logs past the retention window
//! and caps the number of rows kept per site.

use super::Monitor;
use crate::db::Store;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

pub(super) async fn run_cleanup_loop(monitor: Arc<Monitor>, mut stop: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(monitor.config.cleanup_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the immediate first tick; there is nothing to prune at startup.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = interval.tick() => {
                if monitor.is_shutting_down() {
                    break;
                }
                run_cleanup(
                    &monitor.store,
                    monitor.config.retention_days,
                    monitor.config.max_logs_per_site,
                );
            }
        }
    }
}

/// One pruning pass: age-based deletion first, then a per-site row cap so a
/// site probed at a high rate cannot dominate the log table.
pub(super) fn run_cleanup(store: &Store, retention_days: i64, max_logs_per_site: u32) {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    match store.delete_logs_before(cutoff) {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "pruned expired probe logs"),
        Err(e) => tracing::warn!(error = %e, "retention pruning failed"),
    }

    let sites = match store.logged_sites() {
        Ok(sites) => sites,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate logged sites");
            return;
        }
    };
    for (tenant, url) in sites {
        match store.trim_site_logs(&tenant, &url, max_logs_per_site) {
            Ok(0) => {}
            Ok(n) => tracing::info!(url, tenant, trimmed = n, "capped site history"),
            Err(e) => tracing::warn!(url, tenant, error = %e, "history cap failed"),
        }
    }
}
