//! Outbound HTTP probing.
//!
//! Performs the timed GET against a monitored site and maps transport
//! failures onto a closed set of kinds so callers classify over variants
//! instead of matching error text.

pub mod ssl;

use std::time::{Duration, Instant};
use thiserror::Error;

/// Probe failure kinds.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("tls failure: {0}")]
    Tls(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// A completed probe: the status code and how long the round trip took.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResponse {
    pub status: u16,
    pub elapsed_ms: u64,
}

/// HTTP prober with a shared client and per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Perform one GET against `url`, returning the status code and elapsed
    /// time. A small random start jitter avoids thundering-herd across sites
    /// sharing an interval.
    pub async fn probe(&self, url: &str) -> Result<ProbeResponse, ProbeError> {
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, self.timeout))?;

        let status = response.status().as_u16();

        // Read the full body to measure complete transfer time.
        let _body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&e, self.timeout))?;

        Ok(ProbeResponse {
            status,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Flatten an error chain into lowercase text for kind detection where
/// reqwest exposes no structured cause.
fn chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        text.push_str(": ");
        text.push_str(&s.to_string());
        source = s.source();
    }
    text.to_lowercase()
}

fn map_reqwest_error(err: &reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout(timeout);
    }
    if err.is_builder() {
        return ProbeError::InvalidUrl(err.to_string());
    }

    // io::ErrorKind is the one structured signal available below reqwest.
    let mut source = std::error::Error::source(err);
    while let Some(s) = source {
        if let Some(io) = s.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return ProbeError::ConnectionRefused(io.to_string());
            }
        }
        source = s.source();
    }

    let text = chain_text(err);
    if text.contains("dns") || text.contains("resolve") || text.contains("lookup") {
        ProbeError::Dns(text)
    } else if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
        ProbeError::Tls(text)
    } else if text.contains("refused") {
        ProbeError::ConnectionRefused(text)
    } else {
        ProbeError::Network(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_unroutable_host_fails() {
        let prober = HttpProber::new(Duration::from_millis(200)).unwrap();
        let result = prober.probe("http://256.256.256.256").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_chain_text_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "DNS lookup failed");
        let text = chain_text(&inner);
        assert!(text.contains("dns lookup failed"));
    }
}
