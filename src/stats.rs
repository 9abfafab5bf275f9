//! In-memory per-site reliability statistics.
//!
//! One [`SiteStat`] per (tenant, site) key, updated incrementally by the
//! scheduler's probe callback and snapshotted by the report cycle and the
//! stats API. Downtime accounting is a run-length encoding over the probe
//! stream: a window opens on a critical failure and closes only on a
//! success, so consecutive critical failures count as one downtime event.
//! The same rule is applied when replaying durable log records.

use crate::db::ProbeRecord;
use crate::rating::Rating;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Downtime onsets kept per site.
const DOWNTIME_ONSETS_CAP: usize = 50;
/// Downtime onsets returned in a summary.
const RECENT_DOWNTIMES: usize = 5;
/// Latency samples returned in a summary, for client-side sparklines.
const SPARKLINE_POINTS: usize = 50;

/// Key for one tenant's monitored site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SiteKey {
    pub tenant: String,
    pub url: String,
}

impl SiteKey {
    pub fn new(tenant: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            url: url.into(),
        }
    }
}

/// Retention bounds applied while recording.
#[derive(Debug, Clone, Copy)]
pub struct StatCaps {
    /// Bound on recent response times and latency history.
    pub history_cap: usize,
    /// Latency above which a successful request counts as slow.
    pub slow_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySample {
    pub time: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Running aggregate for one site.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteStat {
    pub total_checks: u64,
    pub successes: u64,
    pub failures: u64,
    pub downtime_events: u64,
    pub total_downtime_ms: u64,
    pub slow_requests: u64,
    pub server_errors: u64,
    recent_responses: VecDeque<u64>,
    latency_history: VecDeque<LatencySample>,
    status_classes: HashMap<String, u64>,
    downtime_onsets: VecDeque<DateTime<Utc>>,
    /// Sticky once known; not re-queried while set.
    pub ssl_expiry_days: Option<i64>,
    pub last_rating: Option<Rating>,
    /// Set to the onset time while a critical-failure run is open.
    downtime_open_since: Option<DateTime<Utc>>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, cap: usize) {
    queue.push_back(value);
    while queue.len() > cap.max(1) {
        queue.pop_front();
    }
}

impl SiteStat {
    /// Fold one probe outcome into the aggregate.
    pub fn record(&mut self, record: &ProbeRecord, caps: &StatCaps) {
        self.total_checks += 1;

        if record.success {
            self.successes += 1;
            push_bounded(&mut self.recent_responses, record.response_ms, caps.history_cap);
            push_bounded(
                &mut self.latency_history,
                LatencySample {
                    time: record.time,
                    latency_ms: record.response_ms,
                },
                caps.history_cap,
            );
            if record.response_ms > caps.slow_threshold_ms {
                self.slow_requests += 1;
            }
            if let Some(code) = record.status_code {
                let class = format!("{}xx", code / 100);
                *self.status_classes.entry(class).or_insert(0) += 1;
                if (500..600).contains(&code) {
                    self.server_errors += 1;
                }
            }
            if self.ssl_expiry_days.is_none() {
                self.ssl_expiry_days = record.ssl_expiry_days;
            }
            if let Some(opened) = self.downtime_open_since.take() {
                let span = (record.time - opened).num_milliseconds().max(0);
                self.total_downtime_ms += span as u64;
            }
        } else {
            self.failures += 1;
            // Only a critical failure opens a window; concerning failures in
            // the middle of a run neither open nor close one.
            if record.rating == Rating::Critical && self.downtime_open_since.is_none() {
                self.downtime_events += 1;
                push_bounded(&mut self.downtime_onsets, record.time, DOWNTIME_ONSETS_CAP);
                self.downtime_open_since = Some(record.time);
            }
        }

        self.last_rating = Some(record.rating);
    }

    /// Rebuild an aggregate from durable log records, using the same
    /// downtime rule as the live path.
    pub fn replay<'a>(records: impl IntoIterator<Item = &'a ProbeRecord>, caps: &StatCaps) -> Self {
        let mut stat = SiteStat::default();
        for record in records {
            stat.record(record, caps);
        }
        stat
    }

    /// Point-in-time derived metrics. A site with zero checks yields
    /// all-`None` metrics, never a division error.
    pub fn summary(&self) -> SiteSummary {
        let uptime_percent = if self.total_checks > 0 {
            let pct = self.successes as f64 / self.total_checks as f64 * 100.0;
            Some((pct * 100.0).round() / 100.0)
        } else {
            None
        };

        let average_response_ms = if self.recent_responses.is_empty() {
            None
        } else {
            let sum: u64 = self.recent_responses.iter().sum();
            Some((sum as f64 / self.recent_responses.len() as f64).round() as u64)
        };

        SiteSummary {
            total_checks: self.total_checks,
            successes: self.successes,
            failures: self.failures,
            downtime_events: self.downtime_events,
            total_downtime_ms: self.total_downtime_ms,
            uptime_percent,
            last_response_ms: self.recent_responses.back().copied(),
            average_response_ms,
            min_response_ms: self.recent_responses.iter().min().copied(),
            max_response_ms: self.recent_responses.iter().max().copied(),
            slow_requests: self.slow_requests,
            server_errors: self.server_errors,
            ssl_expiry_days: self.ssl_expiry_days,
            status_classes: self.status_classes.clone(),
            recent_downtimes: self
                .downtime_onsets
                .iter()
                .rev()
                .take(RECENT_DOWNTIMES)
                .rev()
                .copied()
                .collect(),
            latency_history: self
                .latency_history
                .iter()
                .rev()
                .take(SPARKLINE_POINTS)
                .rev()
                .cloned()
                .collect(),
            last_rating: self.last_rating,
            in_downtime: self.downtime_open_since.is_some(),
        }
    }
}

/// Derived metrics served to clients and the report cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SiteSummary {
    pub total_checks: u64,
    pub successes: u64,
    pub failures: u64,
    pub downtime_events: u64,
    pub total_downtime_ms: u64,
    pub uptime_percent: Option<f64>,
    pub last_response_ms: Option<u64>,
    pub average_response_ms: Option<u64>,
    pub min_response_ms: Option<u64>,
    pub max_response_ms: Option<u64>,
    pub slow_requests: u64,
    pub server_errors: u64,
    pub ssl_expiry_days: Option<i64>,
    pub status_classes: HashMap<String, u64>,
    pub recent_downtimes: Vec<DateTime<Utc>>,
    pub latency_history: Vec<LatencySample>,
    pub last_rating: Option<Rating>,
    pub in_downtime: bool,
}

/// Shared map of per-site aggregates.
///
/// The scheduler is the only writer for a given key; the lock lets readers
/// (report cycle, stats API) snapshot concurrently with probing.
pub struct StatsBook {
    inner: RwLock<HashMap<SiteKey, SiteStat>>,
    caps: StatCaps,
}

impl StatsBook {
    pub fn new(caps: StatCaps) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            caps,
        }
    }

    pub fn caps(&self) -> StatCaps {
        self.caps
    }

    /// Create an empty aggregate so a site with zero history still appears
    /// in stats queries.
    pub fn ensure(&self, key: SiteKey) {
        self.inner.write().unwrap().entry(key).or_default();
    }

    pub fn record(&self, key: &SiteKey, record: &ProbeRecord) {
        let mut map = self.inner.write().unwrap();
        map.entry(key.clone())
            .or_default()
            .record(record, &self.caps);
    }

    /// Sticky SSL-expiry days for a key, if already resolved.
    pub fn ssl_expiry_days(&self, key: &SiteKey) -> Option<i64> {
        self.inner.read().unwrap().get(key)?.ssl_expiry_days
    }

    /// Summaries for all sites, optionally filtered by tenant, sorted by key.
    pub fn snapshot(&self, tenant: Option<&str>) -> Vec<(SiteKey, SiteSummary)> {
        let map = self.inner.read().unwrap();
        let mut entries: Vec<_> = map
            .iter()
            .filter(|(key, _)| tenant.map_or(true, |t| key.tenant == t))
            .map(|(key, stat)| (key.clone(), stat.summary()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drop aggregates for a tenant whose URL matches any candidate spelling
    /// or the hostname fallback pattern. Returns how many were removed.
    pub fn remove_matching(
        &self,
        tenant: &str,
        candidates: &[String],
        host_pattern: Option<&Regex>,
    ) -> usize {
        let mut map = self.inner.write().unwrap();
        let before = map.len();
        map.retain(|key, _| {
            if key.tenant != tenant {
                return true;
            }
            let candidate_hit = candidates.iter().any(|c| c == &key.url);
            let host_hit = host_pattern.map_or(false, |re| re.is_match(&key.url));
            !(candidate_hit || host_hit)
        });
        before - map.len()
    }

    /// JSON snapshot of every aggregate, written on shutdown for crash
    /// recovery inspection.
    pub fn backup_json(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Entry<'a> {
            tenant: &'a str,
            url: &'a str,
            stat: &'a SiteStat,
        }
        let map = self.inner.read().unwrap();
        let entries: Vec<_> = map
            .iter()
            .map(|(key, stat)| Entry {
                tenant: &key.tenant,
                url: &key.url,
                stat,
            })
            .collect();
        serde_json::to_value(entries).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> StatCaps {
        StatCaps {
            history_cap: 10,
            slow_threshold_ms: 2000,
        }
    }

    fn success(ms: u64, status: u16) -> ProbeRecord {
        ProbeRecord {
            tenant: "t1".into(),
            url: "https://example.com".into(),
            time: Utc::now(),
            success: true,
            status_code: Some(status),
            response_ms: ms,
            rating: Rating::Excellent,
            error: None,
            ssl_expiry_days: None,
        }
    }

    fn failure(rating: Rating) -> ProbeRecord {
        ProbeRecord {
            tenant: "t1".into(),
            url: "https://example.com".into(),
            time: Utc::now(),
            success: false,
            status_code: None,
            response_ms: 0,
            rating,
            error: Some("probe timed out".into()),
            ssl_expiry_days: None,
        }
    }

    #[test]
    fn test_checks_always_equal_successes_plus_failures() {
        let mut stat = SiteStat::default();
        let stream = [
            success(100, 200),
            failure(Rating::Critical),
            failure(Rating::Concerning),
            success(900, 200),
            failure(Rating::Critical),
        ];
        for record in &stream {
            stat.record(record, &caps());
            assert_eq!(stat.total_checks, stat.successes + stat.failures);
        }
    }

    #[test]
    fn test_all_success_sequence_has_full_uptime() {
        let mut stat = SiteStat::default();
        for _ in 0..7 {
            stat.record(&success(100, 200), &caps());
        }
        assert_eq!(stat.summary().uptime_percent, Some(100.0));
    }

    #[test]
    fn test_consecutive_critical_failures_are_one_downtime_event() {
        let mut stat = SiteStat::default();
        for _ in 0..4 {
            stat.record(&failure(Rating::Critical), &caps());
        }
        stat.record(&success(100, 200), &caps());
        assert_eq!(stat.downtime_events, 1);
        assert!(!stat.summary().in_downtime);

        // A new critical run after the success is a second event.
        stat.record(&failure(Rating::Critical), &caps());
        assert_eq!(stat.downtime_events, 2);
    }

    #[test]
    fn test_concerning_failure_neither_opens_nor_closes_window() {
        let mut stat = SiteStat::default();
        stat.record(&failure(Rating::Concerning), &caps());
        assert_eq!(stat.downtime_events, 0);

        stat.record(&failure(Rating::Critical), &caps());
        stat.record(&failure(Rating::Concerning), &caps());
        stat.record(&failure(Rating::Critical), &caps());
        assert_eq!(stat.downtime_events, 1);
        assert!(stat.summary().in_downtime);
    }

    #[test]
    fn test_zero_checks_yield_no_metrics() {
        let summary = SiteStat::default().summary();
        assert_eq!(summary.uptime_percent, None);
        assert_eq!(summary.average_response_ms, None);
        assert_eq!(summary.min_response_ms, None);
        assert_eq!(summary.max_response_ms, None);
        assert!(summary.latency_history.is_empty());
    }

    #[test]
    fn test_bounded_histories_respect_cap() {
        let mut stat = SiteStat::default();
        for i in 0..100 {
            stat.record(&success(100 + i, 200), &caps());
        }
        assert_eq!(stat.recent_responses.len(), 10);
        assert_eq!(stat.latency_history.len(), 10);
        // Eviction is oldest-first.
        assert_eq!(*stat.recent_responses.front().unwrap(), 190);
    }

    #[test]
    fn test_status_classes_and_slow_and_server_errors() {
        let mut stat = SiteStat::default();
        stat.record(&success(100, 200), &caps());
        stat.record(&success(2500, 201), &caps());
        let mut bad_gateway = success(50, 502);
        bad_gateway.rating = Rating::Critical;
        stat.record(&bad_gateway, &caps());

        assert_eq!(stat.status_classes.get("2xx"), Some(&2));
        assert_eq!(stat.status_classes.get("5xx"), Some(&1));
        assert_eq!(stat.slow_requests, 1);
        assert_eq!(stat.server_errors, 1);
    }

    #[test]
    fn test_ssl_days_are_sticky() {
        let mut stat = SiteStat::default();
        let mut first = success(100, 200);
        first.ssl_expiry_days = Some(42);
        stat.record(&first, &caps());

        let mut second = success(100, 200);
        second.ssl_expiry_days = Some(7);
        stat.record(&second, &caps());
        assert_eq!(stat.ssl_expiry_days, Some(42));
    }

    #[test]
    fn test_replay_matches_live_accounting() {
        let stream = vec![
            success(100, 200),
            failure(Rating::Critical),
            failure(Rating::Critical),
            success(300, 200),
            failure(Rating::Concerning),
            failure(Rating::Critical),
        ];

        let mut live = SiteStat::default();
        for record in &stream {
            live.record(record, &caps());
        }
        let replayed = SiteStat::replay(&stream, &caps());

        assert_eq!(replayed.downtime_events, live.downtime_events);
        assert_eq!(replayed.total_checks, live.total_checks);
        assert_eq!(replayed.failures, live.failures);
    }

    #[test]
    fn test_book_remove_matching_host_pattern() {
        let book = StatsBook::new(caps());
        book.ensure(SiteKey::new("t1", "https://example.com/app"));
        book.ensure(SiteKey::new("t1", "https://other.com"));
        book.ensure(SiteKey::new("t2", "https://example.com/app"));

        let re = Regex::new(r"^https?://example\.com(/.*)?$").unwrap();
        let removed = book.remove_matching("t1", &[], Some(&re));
        assert_eq!(removed, 1);
        assert_eq!(book.snapshot(Some("t1")).len(), 1);
        assert_eq!(book.snapshot(Some("t2")).len(), 1);
    }
}
