//! Alert dispatch.
//!
//! Notifications are handed off through a channel to a dedicated worker so a
//! slow or failing SMTP server can never delay the probe cycle. The worker
//! sends through the email circuit breaker, with the send itself retried.
//! Dispatch failures are logged and swallowed; they must never crash or
//! stall monitoring.

mod mail;
mod report;

pub use mail::*;
pub use report::*;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::retry::{retry, RetryPolicy};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Email circuit breaker: 3 consecutive failures, 5 minute cool-down.
const EMAIL_BREAKER: BreakerConfig = BreakerConfig {
    failure_threshold: 3,
    cool_down: Duration::from_secs(300),
};
const SEND_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay: Duration::from_secs(1),
};
const QUEUE_DEPTH: usize = 100;

/// One queued notification.
#[derive(Debug)]
pub enum AlertJob {
    /// Immediate notification for a critical probe outcome.
    Incident { subject: String, body: String },
    /// Scheduled summary with an optional chart artifact.
    Report {
        subject: String,
        body: String,
        chart: Option<PathBuf>,
    },
}

/// Queue handle used by the scheduler to enqueue notifications.
pub struct AlertDispatcher {
    tx: std::sync::Mutex<Option<mpsc::Sender<AlertJob>>>,
    shutting_down: Arc<AtomicBool>,
}

impl AlertDispatcher {
    /// Spawn the delivery worker. Dropping every dispatcher handle closes
    /// the queue; the worker drains what is already queued and exits, so a
    /// queued critical alert is not lost on shutdown.
    pub fn spawn(
        mailer: Arc<dyn MailTransport>,
        renderer: ReportRenderer,
        shutting_down: Arc<AtomicBool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(run_delivery_worker(rx, mailer, renderer));
        (
            Self {
                tx: std::sync::Mutex::new(Some(tx)),
                shutting_down,
            },
            worker,
        )
    }

    /// Close the queue. The worker finishes whatever is already queued and
    /// then exits.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Enqueue a critical-failure notification.
    pub async fn notify_incident(&self, subject: String, body: String) {
        self.enqueue(AlertJob::Incident { subject, body }).await;
    }

    /// Enqueue the scheduled report.
    pub async fn notify_report(&self, subject: String, body: String, chart: Option<PathBuf>) {
        self.enqueue(AlertJob::Report {
            subject,
            body,
            chart,
        })
        .await;
    }

    async fn enqueue(&self, job: AlertJob) {
        if self.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!("skipping notification, shutting down");
            return;
        }
        let tx = self.tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(job).await.is_err() {
                    tracing::error!("alert worker gone, notification dropped");
                }
            }
            None => tracing::warn!("alert queue closed, notification dropped"),
        }
    }
}

async fn run_delivery_worker(
    mut rx: mpsc::Receiver<AlertJob>,
    mailer: Arc<dyn MailTransport>,
    renderer: ReportRenderer,
) {
    let breaker = CircuitBreaker::new("email", EMAIL_BREAKER);

    while let Some(job) = rx.recv().await {
        deliver(&breaker, &*mailer, &renderer, job).await;
    }
    tracing::info!("alert queue drained, delivery worker exiting");
}

async fn deliver(
    breaker: &CircuitBreaker,
    mailer: &dyn MailTransport,
    renderer: &ReportRenderer,
    job: AlertJob,
) {
    let (subject, body, mut attachments) = match job {
        AlertJob::Incident { subject, body } => (subject, body, Vec::new()),
        AlertJob::Report {
            subject,
            body,
            chart,
        } => (subject, body, chart.into_iter().collect()),
    };

    // Every outgoing mail carries the rendered report of its own body.
    // A render failure degrades to a body-only send.
    match renderer.render_report(&body) {
        Ok(path) => attachments.insert(0, path),
        Err(e) => tracing::warn!(error = %e, "report render failed, sending without attachment"),
    }

    let email = OutboundEmail {
        subject,
        body,
        attachments,
    };

    let result = breaker
        .execute(|| retry(SEND_RETRY, || mailer.send(&email)))
        .await;

    if let Err(e) = result {
        tracing::warn!(subject = %email.subject, error = %e, "notification failed");
    }
}
