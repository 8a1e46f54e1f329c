//! Operator notifications.
//!
//! Delivery is best effort: a failed notification is logged and never
//! changes the outcome of the operation that raised it.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// A channel that delivers alerts to an operator.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError>;
}

/// Writes alerts to the log at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        warn!(subject = subject, "ALERT: {}", body);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    timestamp: String,
}

/// Posts alerts as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        let payload = WebhookPayload {
            subject,
            body,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(AlertError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fans an alert out to every configured channel.
///
/// Succeeds when at least one channel delivered it.
#[derive(Default, Clone)]
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    fn name(&self) -> &str {
        "multi"
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        let mut last_error = None;
        let mut delivered = false;
        for notifier in &self.notifiers {
            match notifier.notify(subject, body).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(channel = notifier.name(), error = %e, "Alert channel failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !delivered => Err(e),
            _ => Ok(()),
        }
    }
}

/// Sends an alert and swallows delivery failures.
pub async fn notify_best_effort(notifier: &dyn Notifier, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(subject, body).await {
        error!(channel = notifier.name(), subject = subject, error = %e, "Failed to deliver alert");
    }
}
