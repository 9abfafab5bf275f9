//! Configuration module for SiteLens.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server and monitoring configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sitelens.db")
    pub db_path: String,
    /// Interval between probe cycles in seconds (default: 20)
    pub probe_interval_secs: u64,
    /// Per-request probe timeout in seconds (default: 10)
    pub request_timeout_secs: u64,
    /// Response time above which a request counts as slow, in ms (default: 2000)
    pub slow_threshold_ms: u64,
    /// Hour of day (0-23) at which the daily report fires (default: 21)
    pub report_hour: u32,
    /// Minute (0-59) at which the daily report fires (default: 13)
    pub report_minute: u32,
    /// Days of probe log history to retain (default: 7)
    pub retention_days: i64,
    /// Maximum retained log rows per site (default: 1000)
    pub max_logs_per_site: u32,
    /// Interval between cleanup runs in seconds (default: 3600)
    pub cleanup_interval_secs: u64,
    /// Directory for rendered report artifacts (default: "reports")
    pub report_dir: String,
    /// Bound on the in-memory recent response time and latency history
    /// sequences per site (default: 1000)
    pub latency_history_cap: usize,
    /// SMTP settings; alerting degrades to a no-op when absent.
    pub smtp: Option<SmtpConfig>,
}

/// Outbound email settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub pass: String,
    /// Recipient for alerts and daily reports.
    pub report_email: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "sitelens.db".to_string(),
            probe_interval_secs: 20,
            request_timeout_secs: 10,
            slow_threshold_ms: 2000,
            report_hour: 21,
            report_minute: 13,
            retention_days: 7,
            max_logs_per_site: 1000,
            cleanup_interval_secs: 3600,
            report_dir: "reports".to_string(),
            latency_history_cap: 1000,
            smtp: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, out: &mut T) {
    if let Ok(raw) = env::var(key) {
        if let Ok(v) = raw.parse() {
            *out = v;
        }
    }
}

impl Config {
    /// Load configuration from `SITELENS_*` environment variables.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        env_parse("SITELENS_HTTP_PORT", &mut cfg.http_port);
        env_parse("SITELENS_PROBE_INTERVAL_SECS", &mut cfg.probe_interval_secs);
        env_parse("SITELENS_REQUEST_TIMEOUT_SECS", &mut cfg.request_timeout_secs);
        env_parse("SITELENS_SLOW_THRESHOLD_MS", &mut cfg.slow_threshold_ms);
        env_parse("SITELENS_REPORT_HOUR", &mut cfg.report_hour);
        env_parse("SITELENS_REPORT_MINUTE", &mut cfg.report_minute);
        env_parse("SITELENS_RETENTION_DAYS", &mut cfg.retention_days);
        env_parse("SITELENS_MAX_LOGS_PER_SITE", &mut cfg.max_logs_per_site);
        env_parse("SITELENS_CLEANUP_INTERVAL_SECS", &mut cfg.cleanup_interval_secs);
        env_parse("SITELENS_LATENCY_HISTORY_CAP", &mut cfg.latency_history_cap);

        if let Ok(path) = env::var("SITELENS_DB_PATH") {
            cfg.db_path = path;
        }
        if let Ok(dir) = env::var("SITELENS_REPORT_DIR") {
            cfg.report_dir = dir;
        }

        cfg.smtp = match (
            env::var("SITELENS_SMTP_HOST"),
            env::var("SITELENS_SMTP_USER"),
            env::var("SITELENS_SMTP_PASS"),
            env::var("SITELENS_REPORT_EMAIL"),
        ) {
            (Ok(host), Ok(user), Ok(pass), Ok(report_email)) => Some(SmtpConfig {
                host,
                user,
                pass,
                report_email,
            }),
            _ => None,
        };

        cfg
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Response time bands used by the probe classifier, in milliseconds.
///
/// A probe rates `critical` above the concerning bound, `concerning` above
/// the acceptable bound, `acceptable` above the excellent bound, and
/// `excellent` at or below it.
#[derive(Debug, Clone, Copy)]
pub struct RatingThresholds {
    pub excellent_max_ms: u64,
    pub acceptable_max_ms: u64,
    pub concerning_max_ms: u64,
}

impl Default for RatingThresholds {
    fn default() -> Self {
        Self {
            excellent_max_ms: 300,
            acceptable_max_ms: 800,
            concerning_max_ms: 1500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "sitelens.db");
        assert_eq!(cfg.probe_interval_secs, 20);
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn test_default_thresholds_are_ordered() {
        let t = RatingThresholds::default();
        assert!(t.excellent_max_ms < t.acceptable_max_ms);
        assert!(t.acceptable_max_ms < t.concerning_max_ms);
    }
}
