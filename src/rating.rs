//! Probe outcome classification.

use crate::config::RatingThresholds;
use crate::probe::ProbeError;
use serde::{Deserialize, Serialize};

/// Severity rating of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Excellent,
    Acceptable,
    Concerning,
    Critical,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Excellent => "excellent",
            Rating::Acceptable => "acceptable",
            Rating::Concerning => "concerning",
            Rating::Critical => "critical",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "excellent" => Rating::Excellent,
            "acceptable" => Rating::Acceptable,
            "concerning" => Rating::Concerning,
            _ => Rating::Critical,
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a completed HTTP probe, evaluated top-down: server errors and
/// very slow responses are critical, client errors and slow responses are
/// concerning, and anything beyond the excellent band is merely acceptable.
pub fn classify(status: u16, response_ms: u64, thresholds: &RatingThresholds) -> Rating {
    if status >= 500 || response_ms > thresholds.concerning_max_ms {
        Rating::Critical
    } else if status >= 400 || response_ms > thresholds.acceptable_max_ms {
        Rating::Concerning
    } else if response_ms > thresholds.excellent_max_ms {
        Rating::Acceptable
    } else {
        Rating::Excellent
    }
}

/// Classify a probe that produced no HTTP response at all.
///
/// Timeouts, DNS trouble, and generic network errors look transient and rate
/// `concerning`; refused connections, TLS failures, and everything else are
/// treated as a firm down (`critical`). Only critical failures open a
/// downtime window or fire an immediate alert.
pub fn classify_failure(error: &ProbeError) -> Rating {
    match error {
        ProbeError::Timeout(_) | ProbeError::Dns(_) | ProbeError::Network(_) => Rating::Concerning,
        ProbeError::ConnectionRefused(_) | ProbeError::Tls(_) | ProbeError::InvalidUrl(_) => {
            Rating::Critical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t() -> RatingThresholds {
        RatingThresholds::default()
    }

    #[test]
    fn test_classify_bands() {
        assert_eq!(classify(200, 100, &t()), Rating::Excellent);
        assert_eq!(classify(200, 1000, &t()), Rating::Concerning);
        assert_eq!(classify(200, 500, &t()), Rating::Acceptable);
        assert_eq!(classify(404, 50, &t()), Rating::Concerning);
        assert_eq!(classify(500, 50, &t()), Rating::Critical);
        // Response time alone can force critical.
        assert_eq!(classify(200, 3000, &t()), Rating::Critical);
    }

    #[test]
    fn test_band_edges_are_inclusive() {
        assert_eq!(classify(200, 300, &t()), Rating::Excellent);
        assert_eq!(classify(200, 301, &t()), Rating::Acceptable);
        assert_eq!(classify(200, 800, &t()), Rating::Acceptable);
        assert_eq!(classify(200, 1500, &t()), Rating::Concerning);
        assert_eq!(classify(200, 1501, &t()), Rating::Critical);
        assert_eq!(classify(499, 50, &t()), Rating::Concerning);
    }

    #[test]
    fn test_classify_failure_kinds() {
        assert_eq!(
            classify_failure(&ProbeError::Timeout(Duration::from_secs(10))),
            Rating::Concerning
        );
        assert_eq!(
            classify_failure(&ProbeError::Dns("no records".into())),
            Rating::Concerning
        );
        assert_eq!(
            classify_failure(&ProbeError::Network("reset".into())),
            Rating::Concerning
        );
        assert_eq!(
            classify_failure(&ProbeError::ConnectionRefused("refused".into())),
            Rating::Critical
        );
        assert_eq!(
            classify_failure(&ProbeError::Tls("bad cert".into())),
            Rating::Critical
        );
    }

    #[test]
    fn test_rating_round_trip() {
        for r in [
            Rating::Excellent,
            Rating::Acceptable,
            Rating::Concerning,
            Rating::Critical,
        ] {
            assert_eq!(Rating::from_str_lossy(r.as_str()), r);
        }
    }
}
