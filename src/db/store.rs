//! SQLite store implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;
use crate::rating::Rating;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the schema with embedded migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Site registry ---

    /// Register a site for a tenant. Returns false when it already existed.
    pub fn add_site(&self, tenant: &str, url: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO sites (tenant, url, added_at) VALUES (?1, ?2, ?3)",
            params![tenant, url, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// Get all registered sites across tenants.
    pub fn get_sites(&self) -> Result<Vec<SiteRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, tenant, url, added_at FROM sites ORDER BY id")?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    /// Get the sites registered by one tenant.
    pub fn get_tenant_sites(&self, tenant: &str) -> Result<Vec<SiteRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, tenant, url, added_at FROM sites WHERE tenant = ?1 ORDER BY id")?;
        let sites = stmt
            .query_map(params![tenant], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    /// Delete a tenant's sites matching any of the given URL spellings.
    /// Returns the number of rows removed.
    pub fn delete_sites(&self, tenant: &str, urls: &[String]) -> Result<usize, DbError> {
        self.delete_in("sites", tenant, urls)
    }

    /// Delete a tenant's sites whose URL matches `http(s)://<host>` with any
    /// path, the fallback used when no exact spelling matched.
    pub fn delete_sites_by_host(&self, tenant: &str, host: &str) -> Result<usize, DbError> {
        self.delete_like("sites", tenant, host)
    }

    // --- Probe log ---

    /// Append one probe record to the durable log.
    pub fn append_log(&self, record: &ProbeRecord) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO probe_logs
                (tenant, url, time, success, status_code, response_ms, rating, error, ssl_expiry_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.tenant,
                record.url,
                record.time.to_rfc3339(),
                record.success,
                record.status_code,
                record.response_ms as i64,
                record.rating.as_str(),
                record.error,
                record.ssl_expiry_days,
            ],
        )?;
        Ok(())
    }

    /// All log records for one tenant+site in time order, oldest first.
    pub fn get_logs(&self, tenant: &str, url: &str) -> Result<Vec<ProbeRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tenant, url, time, success, status_code, response_ms, rating, error, ssl_expiry_days
             FROM probe_logs WHERE tenant = ?1 AND url = ?2 ORDER BY time",
        )?;
        let logs = stmt
            .query_map(params![tenant, url], log_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// Delete a tenant's log records matching any of the given URL spellings.
    pub fn delete_logs(&self, tenant: &str, urls: &[String]) -> Result<usize, DbError> {
        self.delete_in("probe_logs", tenant, urls)
    }

    /// Host-pattern fallback for log deletion.
    pub fn delete_logs_by_host(&self, tenant: &str, host: &str) -> Result<usize, DbError> {
        self.delete_like("probe_logs", tenant, host)
    }

    /// Delete log records older than the cutoff, across all sites.
    pub fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM probe_logs WHERE time < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    /// Distinct (tenant, url) pairs present in the log.
    pub fn logged_sites(&self) -> Result<Vec<(String, String)>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT tenant, url FROM probe_logs")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Trim one site's log to its newest `max` rows. Returns rows removed.
    pub fn trim_site_logs(&self, tenant: &str, url: &str, max: u32) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM probe_logs
             WHERE tenant = ?1 AND url = ?2 AND id NOT IN (
                 SELECT id FROM probe_logs
                 WHERE tenant = ?1 AND url = ?2
                 ORDER BY time DESC LIMIT ?3
             )",
            params![tenant, url, max],
        )?;
        Ok(removed)
    }

    // --- helpers ---

    fn delete_in(&self, table: &str, tenant: &str, urls: &[String]) -> Result<usize, DbError> {
        if urls.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let marks = vec!["?"; urls.len()].join(", ");
        let sql = format!("DELETE FROM {table} WHERE tenant = ? AND url IN ({marks})");
        let mut bind: Vec<&dyn ToSql> = vec![&tenant];
        for url in urls {
            bind.push(url);
        }
        let removed = conn.execute(&sql, &bind[..])?;
        Ok(removed)
    }

    fn delete_like(&self, table: &str, tenant: &str, host: &str) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let http = format!("http://{host}%");
        let https = format!("https://{host}%");
        let sql = format!(
            "DELETE FROM {table} WHERE tenant = ?1 AND (url LIKE ?2 OR url LIKE ?3)"
        );
        let removed = conn.execute(&sql, params![tenant, http, https])?;
        Ok(removed)
    }
}

fn parse_time(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn site_from_row(row: &Row<'_>) -> SqlResult<SiteRecord> {
    Ok(SiteRecord {
        id: row.get(0)?,
        tenant: row.get(1)?,
        url: row.get(2)?,
        added_at: parse_time(row.get(3)?),
    })
}

fn log_from_row(row: &Row<'_>) -> SqlResult<ProbeRecord> {
    let rating: String = row.get(6)?;
    Ok(ProbeRecord {
        tenant: row.get(0)?,
        url: row.get(1)?,
        time: parse_time(row.get(2)?),
        success: row.get(3)?,
        status_code: row.get::<_, Option<i64>>(4)?.map(|c| c as u16),
        response_ms: row.get::<_, i64>(5)? as u64,
        rating: Rating::from_str_lossy(&rating),
        error: row.get(7)?,
        ssl_expiry_days: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn record(tenant: &str, url: &str, success: bool) -> ProbeRecord {
        ProbeRecord {
            tenant: tenant.to_string(),
            url: url.to_string(),
            time: Utc::now(),
            success,
            status_code: success.then_some(200),
            response_ms: 120,
            rating: if success {
                Rating::Excellent
            } else {
                Rating::Critical
            },
            error: (!success).then(|| "connection refused".to_string()),
            ssl_expiry_days: None,
        }
    }

    #[test]
    fn test_add_site_is_idempotent() {
        let (store, _dir) = test_store();
        assert!(store.add_site("t1", "https://example.com").unwrap());
        assert!(!store.add_site("t1", "https://example.com").unwrap());
        // Same URL for a different tenant is a distinct registration.
        assert!(store.add_site("t2", "https://example.com").unwrap());
        assert_eq!(store.get_sites().unwrap().len(), 2);
        assert_eq!(store.get_tenant_sites("t1").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_sites_by_candidates_and_host() {
        let (store, _dir) = test_store();
        store.add_site("t1", "https://example.com/app").unwrap();

        // No exact candidate matches.
        let removed = store
            .delete_sites("t1", &["https://example.com".to_string()])
            .unwrap();
        assert_eq!(removed, 0);

        // The host fallback does.
        let removed = store.delete_sites_by_host("t1", "example.com").unwrap();
        assert_eq!(removed, 1);

        // Deleting again is a no-op, not an error.
        let removed = store.delete_sites_by_host("t1", "example.com").unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_log_round_trip() {
        let (store, _dir) = test_store();
        store.append_log(&record("t1", "https://a.com", true)).unwrap();
        store.append_log(&record("t1", "https://a.com", false)).unwrap();
        store.append_log(&record("t1", "https://b.com", true)).unwrap();

        let logs = store.get_logs("t1", "https://a.com").unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].success);
        assert_eq!(logs[0].status_code, Some(200));
        assert_eq!(logs[1].rating, Rating::Critical);
        assert_eq!(logs[1].error.as_deref(), Some("connection refused"));

        let mut sites = store.logged_sites().unwrap();
        sites.sort();
        assert_eq!(sites.len(), 2);
    }

    #[test]
    fn test_retention_cutoff_and_trim() {
        let (store, _dir) = test_store();
        let mut old = record("t1", "https://a.com", true);
        old.time = Utc::now() - chrono::Duration::days(30);
        store.append_log(&old).unwrap();
        for _ in 0..5 {
            store.append_log(&record("t1", "https://a.com", true)).unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::days(7);
        assert_eq!(store.delete_logs_before(cutoff).unwrap(), 1);
        assert_eq!(store.get_logs("t1", "https://a.com").unwrap().len(), 5);

        assert_eq!(store.trim_site_logs("t1", "https://a.com", 3).unwrap(), 2);
        assert_eq!(store.get_logs("t1", "https://a.com").unwrap().len(), 3);
    }
}
