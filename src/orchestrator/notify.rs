//! Best-effort operator notifications.
//!
//! `notify` never blocks the caller and never fails: delivery problems are
//! logged and dropped.

use crate::catalog::{Run, RunId};
use crate::runtime::config::{MailSettings, ScanConfig};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const MAIL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn scan_starting(run: &Run) -> Self {
        Self::new(
            "Scan Starting",
            format!(
                "Starting time: {}\nRun id: {}\nRank window: {}..={}\nThe scan is starting to queue sites.",
                run.start_time.to_rfc3339(),
                run.id,
                run.start_rank,
                run.end_rank
            ),
        )
    }

    /// Sent once every chain of a run has been handed to the executor. Work may still be running.
    pub fn all_enqueued(run: &Run, sites: usize) -> Self {
        Self::new(
            "All Scans In Queue",
            format!(
                "Run start time: {}\nRun id: {}\nSites queued: {sites}\nThe scan is in progress and the queuing process is done.",
                run.start_time.to_rfc3339(),
                run.id
            ),
        )
    }

    pub fn published(run_id: RunId, results: usize, artifacts: &[String]) -> Self {
        let mut body = format!("Run id: {run_id}\nNumber results: {results}\n");
        if !artifacts.is_empty() {
            body.push_str("Artifacts:\n");
            for artifact in artifacts {
                body.push_str("  ");
                body.push_str(artifact);
                body.push('\n');
            }
        }
        Self::new(format!("Scan id {run_id} has been published"), body)
    }

    pub fn list_update_started(at: DateTime<Utc>) -> Self {
        Self::new(
            "Site List Update Started",
            format!("Started site list update at: {}", at.to_rfc3339()),
        )
    }

    pub fn list_update_done(at: DateTime<Utc>, summary: &str) -> Self {
        Self::new(
            "Site List Update Is Done",
            format!("Ended site list update at: {}\n{summary}", at.to_rfc3339()),
        )
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log. Used in development and when no mail key is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            target: "dnsposture::notify",
            subject = %notification.subject,
            body = %notification.body,
            "notification"
        );
    }
}

/// Sends plain-text mail through the SendGrid v3 API on a spawned task.
#[derive(Debug, Clone)]
pub struct MailNotifier {
    client: reqwest::Client,
    endpoint: String,
    settings: MailSettings,
}

impl MailNotifier {
    pub fn new(settings: MailSettings) -> anyhow::Result<Self> {
        Self::with_endpoint(settings, SENDGRID_ENDPOINT)
    }

    pub fn with_endpoint(settings: MailSettings, endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(MAIL_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            settings,
        })
    }

    fn payload(&self, notification: &Notification) -> serde_json::Value {
        let recipients: Vec<_> = self
            .settings
            .to
            .iter()
            .map(|address| json!({ "email": address }))
            .collect();
        json!({
            "personalizations": [{ "to": recipients }],
            "from": { "email": self.settings.from },
            "subject": notification.subject,
            "content": [{ "type": "text/plain", "value": notification.body }],
        })
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, notification: Notification) {
        let Some(api_key) = self.settings.api_key.clone() else {
            LogNotifier.notify(notification);
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(subject = %notification.subject, "no async runtime; notification dropped");
            return;
        };

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.payload(&notification));
        let subject = notification.subject;

        handle.spawn(async move {
            match request.send().await.and_then(|response| response.error_for_status()) {
                Ok(_) => tracing::debug!(subject = %subject, "notification mailed"),
                Err(err) => {
                    tracing::warn!(subject = %subject, error = %err, "failed to mail notification")
                }
            }
        });
    }
}

/// Picks the mail notifier in production when an API key is configured, the log notifier otherwise.
pub fn notifier_for(config: &ScanConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let mail = config.mail();
    if config.environment().is_production() && mail.api_key.is_some() {
        Ok(Arc::new(MailNotifier::new(mail.clone())?))
    } else {
        Ok(Arc::new(LogNotifier))
    }
}
