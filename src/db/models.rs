//! Database model types.

use crate::rating::Rating;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored site registered by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: i64,
    pub tenant: String,
    pub url: String,
    pub added_at: DateTime<Utc>,
}

/// One probe outcome, produced once per check.
///
/// Owned by the scheduler for the duration of a check, then handed to the
/// stats accumulator and appended to the durable log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub tenant: String,
    pub url: String,
    pub time: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_ms: u64,
    pub rating: Rating,
    pub error: Option<String>,
    pub ssl_expiry_days: Option<i64>,
}
