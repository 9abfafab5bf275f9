//! SSL certificate expiry inspection.
//!
//! Opens a TLS connection to the site's host and reads the leaf
//! certificate's validity window, returning days until expiry.

use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

#[derive(Error, Debug)]
pub enum SslError {
    #[error("invalid host name: {0}")]
    InvalidHost(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    #[error("no peer certificate presented")]
    NoCertificate,
    #[error("certificate parse failed: {0}")]
    Parse(String),
}

/// Checker with a fixed connect/handshake timeout and a shared root store.
#[derive(Clone)]
pub struct SslChecker {
    config: Arc<ClientConfig>,
    timeout: Duration,
}

impl SslChecker {
    pub fn new(timeout: Duration) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            config: Arc::new(config),
            timeout,
        }
    }

    /// Days until the host's leaf certificate expires. Negative when the
    /// certificate is already expired.
    pub async fn expiry_days(&self, host: &str) -> Result<i64, SslError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| SslError::InvalidHost(e.to_string()))?;

        let sock = tokio::time::timeout(self.timeout, TcpStream::connect((host, 443)))
            .await
            .map_err(|_| SslError::Connect(format!("timed out connecting to {host}:443")))?
            .map_err(|e| SslError::Connect(e.to_string()))?;

        let connector = TlsConnector::from(self.config.clone());
        let tls_stream = tokio::time::timeout(self.timeout, connector.connect(server_name, sock))
            .await
            .map_err(|_| SslError::Handshake(format!("handshake timed out for {host}")))?
            .map_err(|e| SslError::Handshake(e.to_string()))?;

        let (_, session) = tls_stream.get_ref();
        let certs = session.peer_certificates().ok_or(SslError::NoCertificate)?;
        let leaf = certs.first().ok_or(SslError::NoCertificate)?;

        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| SslError::Parse(e.to_string()))?;

        let not_after = cert.validity().not_after.timestamp();
        let now = chrono::Utc::now().timestamp();
        Ok((not_after - now) / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_host_rejected() {
        let checker = SslChecker::new(Duration::from_millis(100));
        let result = checker.expiry_days("not a hostname").await;
        assert!(matches!(result, Err(SslError::InvalidHost(_))));
    }
}
