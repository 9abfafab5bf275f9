//! Outbound mail transport.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("message build failed: {0}")]
    Build(String),
    #[error("smtp verify failed: {0}")]
    Verify(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("attachment unreadable: {0}")]
    Attachment(String),
}

/// One outbound notification.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

/// Seam over the actual mail delivery so the dispatcher can be exercised
/// without a live SMTP server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;
}

/// SMTP transport built from [`SmtpConfig`].
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| MailError::Build(e.to_string()))?
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();

        let from = format!("SiteLens Monitor <{}>", config.user)
            .parse()
            .map_err(|e: lettre::address::AddressError| MailError::Address(e.to_string()))?;
        let to = config
            .report_email
            .parse()
            .map_err(|e: lettre::address::AddressError| MailError::Address(e.to_string()))?;

        Ok(Self {
            transport,
            from,
            to,
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, MailError> {
        let mut parts = MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(email.body.clone()),
        );

        for path in &email.attachments {
            let bytes =
                std::fs::read(path).map_err(|e| MailError::Attachment(e.to_string()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            let content_type = ContentType::parse("application/octet-stream")
                .map_err(|e| MailError::Build(e.to_string()))?;
            parts = parts.singlepart(Attachment::new(filename).body(bytes, content_type));
        }

        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(&email.subject)
            .multipart(parts)
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        // Verify connectivity first so auth problems surface as their own
        // error rather than a failed send.
        let ok = self
            .transport
            .test_connection()
            .await
            .map_err(|e| MailError::Verify(e.to_string()))?;
        if !ok {
            return Err(MailError::Verify("smtp connection rejected".to_string()));
        }

        let message = self.build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;
        tracing::info!(subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Transport used when SMTP is not configured; logs and discards.
pub struct NoopMailer;

#[async_trait]
impl MailTransport for NoopMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        tracing::info!(subject = %email.subject, "email disabled, dropping notification");
        Ok(())
    }
}
