//! Scheduler: drives the periodic probe, report, and cleanup cycles and
//! exposes the site registration operations.
//!
//! Within a probe cycle sites are checked one at a time to bound outbound
//! load; the cycles themselves run as independent timers that may
//! interleave. All mutation of the in-memory aggregates happens in the
//! probe-completion path here.

mod cleanup;

use crate::alert::{AlertDispatcher, MailTransport, NoopMailer, ReportRenderer, SmtpMailer};
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::config::{Config, RatingThresholds};
use crate::db::{ProbeRecord, Store};
use crate::probe::ssl::SslChecker;
use crate::probe::HttpProber;
use crate::rating::{classify, classify_failure, Rating};
use crate::retry::{retry, RetryPolicy};
use crate::stats::{SiteKey, StatCaps, StatsBook};

use chrono::{Timelike, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

/// Probe retry: 2 attempts, 1s base delay.
const PROBE_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay: Duration::from_secs(1),
};
/// SSL lookup retry: 2 attempts, 2s base delay.
const SSL_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay: Duration::from_secs(2),
};
/// SSL breaker is stricter than email: lookups fail in bursts when a CA or
/// resolver misbehaves, so quarantine longer.
const SSL_BREAKER: BreakerConfig = BreakerConfig {
    failure_threshold: 5,
    cool_down: Duration::from_secs(600),
};
/// Total time allowed for shutdown hooks and the alert-queue drain.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Structured result of a registration attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Structured result of a removal. Removal always succeeds: the desired end
/// state ("this site is not monitored") holds even when nothing matched.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub success: bool,
    pub message: String,
    pub removed_sites: usize,
    pub removed_logs: usize,
}

/// The monitoring engine.
pub struct Monitor {
    store: Arc<Store>,
    stats: StatsBook,
    prober: HttpProber,
    ssl: SslChecker,
    ssl_breaker: CircuitBreaker,
    alerts: AlertDispatcher,
    alert_worker: Mutex<Option<JoinHandle<()>>>,
    renderer: ReportRenderer,
    config: Config,
    thresholds: RatingThresholds,
    shutting_down: Arc<AtomicBool>,
    stop_tx: broadcast::Sender<()>,
}

impl Monitor {
    pub fn new(
        config: Config,
        store: Arc<Store>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let prober = HttpProber::new(config.request_timeout())?;
        let ssl = SslChecker::new(config.request_timeout());
        let renderer = ReportRenderer::new(&config.report_dir);
        let shutting_down = Arc::new(AtomicBool::new(false));

        let mailer: Arc<dyn MailTransport> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                tracing::warn!("SMTP not configured, email notifications disabled");
                Arc::new(NoopMailer)
            }
        };
        let (alerts, alert_worker) =
            AlertDispatcher::spawn(mailer, renderer.clone(), shutting_down.clone());

        let stats = StatsBook::new(StatCaps {
            history_cap: config.latency_history_cap,
            slow_threshold_ms: config.slow_threshold_ms,
        });
        let (stop_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            store,
            stats,
            prober,
            ssl,
            ssl_breaker: CircuitBreaker::new("ssl", SSL_BREAKER),
            alerts,
            alert_worker: Mutex::new(Some(alert_worker)),
            renderer,
            config,
            thresholds: RatingThresholds::default(),
            shutting_down,
            stop_tx,
        }))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn stats(&self) -> &StatsBook {
        &self.stats
    }

    /// Seed an empty aggregate for every registered site, then start the
    /// probe, report, and cleanup cycles. The initial registry read is the
    /// one fatal persistence failure.
    pub fn start(self: &Arc<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sites = self.store.get_sites()?;
        tracing::info!("starting scheduler with {} sites", sites.len());
        for site in &sites {
            self.stats.ensure(SiteKey::new(&site.tenant, &site.url));
        }

        tokio::spawn(run_probe_loop(self.clone(), self.stop_tx.subscribe()));
        tokio::spawn(run_report_loop(self.clone(), self.stop_tx.subscribe()));
        tokio::spawn(cleanup::run_cleanup_loop(
            self.clone(),
            self.stop_tx.subscribe(),
        ));
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Idempotent graceful shutdown: stop new cycles, drain the alert
    /// queue, and persist a snapshot of the in-memory aggregates, all
    /// within a bounded time budget. In-flight probes finish naturally.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("graceful shutdown initiated");
        let _ = self.stop_tx.send(());
        self.alerts.close();

        let worker = self.alert_worker.lock().unwrap().take();
        let result = tokio::time::timeout(SHUTDOWN_BUDGET, async {
            if let Some(worker) = worker {
                let _ = worker.await;
            }
            self.write_backup();
        })
        .await;

        match result {
            Ok(()) => tracing::info!("graceful shutdown completed"),
            Err(_) => tracing::warn!("shutdown budget exceeded, exiting anyway"),
        }
    }

    fn write_backup(&self) {
        let path = std::path::Path::new(&self.config.report_dir)
            .join(format!("backup_stats_{}.json", Utc::now().timestamp_millis()));
        match serde_json::to_vec_pretty(&self.stats.backup_json()) {
            Ok(bytes) => {
                let write = std::fs::create_dir_all(&self.config.report_dir)
                    .and_then(|_| std::fs::write(&path, bytes));
                if let Err(e) = write {
                    tracing::warn!(error = %e, "failed to write stats backup");
                } else {
                    tracing::info!(path = %path.display(), "stats backed up");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize stats backup"),
        }
    }

    /// Probe every registered site once, sequentially.
    pub async fn probe_all(&self) {
        let sites = match self.store.get_sites() {
            Ok(sites) => sites,
            Err(e) => {
                tracing::error!(error = %e, "failed to enumerate sites, skipping cycle");
                return;
            }
        };

        for site in sites {
            if self.is_shutting_down() {
                break;
            }
            self.check_site(&site.tenant, &site.url).await;
        }
    }

    /// One full check of one site: probe with retry, classify, accumulate,
    /// persist, and alert on a critical outcome.
    pub async fn check_site(&self, tenant: &str, url: &str) {
        let key = SiteKey::new(tenant, url);
        let started = Utc::now();
        let clock = std::time::Instant::now();

        let record = match retry(PROBE_RETRY, || self.prober.probe(url)).await {
            Ok(response) => {
                let rating = classify(response.status, response.elapsed_ms, &self.thresholds);
                // Resolve SSL expiry once per site; sticky afterwards.
                let ssl_expiry_days = match self.stats.ssl_expiry_days(&key) {
                    Some(days) => Some(days),
                    None => self.resolve_ssl_days(url).await,
                };
                tracing::info!(
                    url,
                    status = response.status,
                    elapsed_ms = response.elapsed_ms,
                    rating = %rating,
                    "probe completed"
                );
                ProbeRecord {
                    tenant: tenant.to_string(),
                    url: url.to_string(),
                    time: started,
                    success: true,
                    status_code: Some(response.status),
                    response_ms: response.elapsed_ms,
                    rating,
                    error: None,
                    ssl_expiry_days,
                }
            }
            Err(exhausted) => {
                let rating = classify_failure(&exhausted.source);
                let label = match rating {
                    Rating::Critical => "DOWN",
                    _ => "POSSIBLE ISSUE",
                };
                tracing::warn!(url, error = %exhausted, label, "probe failed");
                ProbeRecord {
                    tenant: tenant.to_string(),
                    url: url.to_string(),
                    time: started,
                    success: false,
                    status_code: None,
                    response_ms: clock.elapsed().as_millis() as u64,
                    rating,
                    error: Some(exhausted.to_string()),
                    ssl_expiry_days: None,
                }
            }
        };

        self.stats.record(&key, &record);

        // A storage hiccup must never halt monitoring.
        if let Err(e) = self.store.append_log(&record) {
            tracing::warn!(url, error = %e, "failed to persist probe log");
        }

        if record.rating == Rating::Critical {
            let detail = record
                .error
                .clone()
                .unwrap_or_else(|| format!("HTTP {}", record.status_code.unwrap_or(0)));
            self.alerts
                .notify_incident(
                    format!("Website Down Alert: {url}"),
                    format!(
                        "ALERT: {url} is DOWN.\nTime: {}\nError: {detail}\nResponse time: {}ms",
                        record.time.to_rfc3339(),
                        record.response_ms
                    ),
                )
                .await;
        }
    }

    /// Days until certificate expiry, through the SSL circuit breaker with
    /// retries. Failures are logged at low severity and yield `None`.
    async fn resolve_ssl_days(&self, url: &str) -> Option<i64> {
        let host = host_of(url)?;
        let result = self
            .ssl_breaker
            .execute(|| retry(SSL_RETRY, || self.ssl.expiry_days(&host)))
            .await;
        match result {
            Ok(days) => Some(days),
            Err(e) => {
                tracing::debug!(host, error = %e, "ssl expiry lookup failed");
                None
            }
        }
    }

    /// Register a site for a tenant and probe it immediately so stats need
    /// not wait for the next scheduled cycle.
    pub async fn add_site(self: &Arc<Self>, raw_url: &str, tenant: &str) -> AddOutcome {
        if tenant.trim().is_empty() {
            return AddOutcome {
                success: false,
                message: "Tenant is required".to_string(),
                url: None,
            };
        }
        let url = match normalize_url(raw_url) {
            Ok(url) => url,
            Err(message) => {
                return AddOutcome {
                    success: false,
                    message,
                    url: None,
                }
            }
        };

        match self.store.add_site(tenant, &url) {
            Ok(true) => tracing::info!(url, tenant, "site registered"),
            Ok(false) => tracing::info!(url, tenant, "site already registered"),
            Err(e) => {
                return AddOutcome {
                    success: false,
                    message: format!("Failed to add site: {e}"),
                    url: None,
                }
            }
        }

        self.stats.ensure(SiteKey::new(tenant, &url));

        // Out-of-band first probe; fire and forget.
        if !self.is_shutting_down() {
            let monitor = self.clone();
            let tenant = tenant.to_string();
            let probe_url = url.clone();
            tokio::spawn(async move {
                monitor.check_site(&tenant, &probe_url).await;
            });
        }

        AddOutcome {
            success: true,
            message: "Monitoring started".to_string(),
            url: Some(url),
        }
    }

    /// Stop monitoring a site. Matching tolerates URL-representation drift
    /// (scheme, trailing slash, bare hostname); when no normalized variant
    /// matches, a hostname pattern pass is tried before giving up.
    pub fn remove_site(&self, raw_url: &str, tenant: &str) -> RemoveOutcome {
        let candidates = candidate_urls(raw_url);
        if candidates.is_empty() {
            return RemoveOutcome {
                success: false,
                message: "Invalid URL".to_string(),
                removed_sites: 0,
                removed_logs: 0,
            };
        }

        let mut removed_sites = self
            .store
            .delete_sites(tenant, &candidates)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "site deletion failed");
                0
            });
        let mut removed_logs = self
            .store
            .delete_logs(tenant, &candidates)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "log deletion failed");
                0
            });

        let mut host_pattern = None;
        if removed_sites == 0 && removed_logs == 0 {
            if let Some(host) = host_of(&candidates[0]) {
                removed_sites += self.store.delete_sites_by_host(tenant, &host).unwrap_or(0);
                removed_logs += self.store.delete_logs_by_host(tenant, &host).unwrap_or(0);
                host_pattern = host_regex(&host);
            }
        }

        self.stats
            .remove_matching(tenant, &candidates, host_pattern.as_ref());

        RemoveOutcome {
            success: true,
            message: "Monitoring stopped".to_string(),
            removed_sites,
            removed_logs,
        }
    }

    /// Compose and enqueue the scheduled report across all tenants.
    pub async fn send_report(&self) {
        let entries = self.stats.snapshot(None);
        let mut summary = format!(
            "Daily Website Performance Report\nTime: {}\n\n",
            Utc::now().to_rfc3339()
        );

        for (key, s) in &entries {
            let uptime = s
                .uptime_percent
                .map(|p| format!("{p:.2}%"))
                .unwrap_or_else(|| "N/A".to_string());
            let avg = s
                .average_response_ms
                .map(|ms| format!("{ms} ms"))
                .unwrap_or_else(|| "N/A".to_string());
            let rating = s
                .last_rating
                .map(|r| r.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let ssl = s
                .ssl_expiry_days
                .map(|d| format!("{d} days"))
                .unwrap_or_else(|| "N/A".to_string());
            summary.push_str(&format!(
                "{} [{}]\n + Uptime: {}\n + Avg Response: {}\n + Last Rating: {}\n + SSL Expiry: {}\n\n",
                key.url, key.tenant, uptime, avg, rating, ssl
            ));
        }

        let chart_data: Vec<(String, u64)> = entries
            .iter()
            .map(|(key, s)| (key.url.clone(), s.average_response_ms.unwrap_or(0)))
            .collect();
        let chart = match self.renderer.render_latency_chart(&chart_data) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "latency chart render failed");
                None
            }
        };

        self.alerts
            .notify_report("Daily Website Monitoring Report".to_string(), summary, chart)
            .await;
    }
}

/// Probe cycle. The first tick fires immediately, which doubles as the
/// initial run at startup.
async fn run_probe_loop(monitor: Arc<Monitor>, mut stop: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(monitor.config.probe_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = interval.tick() => {
                if monitor.is_shutting_down() {
                    break;
                }
                monitor.probe_all().await;
            }
        }
    }
}

/// Report cycle: a one-minute tick that fires the full report only when the
/// wall clock matches the configured report time.
async fn run_report_loop(monitor: Arc<Monitor>, mut stop: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = interval.tick() => {
                if monitor.is_shutting_down() {
                    break;
                }
                let now = chrono::Local::now();
                if now.hour() == monitor.config.report_hour
                    && now.minute() == monitor.config.report_minute
                {
                    monitor.send_report().await;
                }
            }
        }
    }
}

/// Trim whitespace, default to https when no scheme is given, and validate.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Invalid URL".to_string());
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&with_scheme).map_err(|_| "Invalid URL format".to_string())?;
    if parsed.host_str().is_none() {
        return Err("Invalid URL format".to_string());
    }
    Ok(parsed.to_string())
}

/// Spelling variants tried when matching stored records against user input:
/// the raw string, the normalized form, the origin, and the path with and
/// without a trailing slash.
pub fn candidate_urls(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let mut variants: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !s.is_empty() && !variants.contains(&s) {
            variants.push(s);
        }
    };

    push(trimmed.to_string());

    if let Ok(normalized) = normalize_url(trimmed) {
        if let Ok(parsed) = Url::parse(&normalized) {
            let origin = parsed.origin().ascii_serialization();
            let path = parsed.path();
            let no_slash = format!("{}{}", origin, path.trim_end_matches('/'));

            push(normalized.clone());
            push(normalized.trim_end_matches('/').to_string());
            push(origin.clone());
            push(no_slash.clone());
            push(format!("{no_slash}/"));
        }
    }

    variants
}

fn host_of(url: &str) -> Option<String> {
    let normalized = normalize_url(url).ok()?;
    let parsed = Url::parse(&normalized).ok()?;
    parsed.host_str().map(|h| h.to_string())
}

fn host_regex(host: &str) -> Option<Regex> {
    Regex::new(&format!(r"^https?://{}(/.*)?$", regex::escape(host))).ok()
}
