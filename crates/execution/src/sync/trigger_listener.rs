//! Reconnecting wrapper around a trigger feed.

use crate::alerts::{Notifier, notify_best_effort};
use clmm_keeper_protocols::prelude::{Trigger, TriggerFeed};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{error, info, warn};

/// Configuration for the trigger listener.
#[derive(Debug, Clone, Copy)]
pub struct TriggerListenerConfig {
    /// Delay between sessions.
    pub reconnect_delay: Duration,
    /// Consecutive sessions without a marker before the feed is reported
    /// down and the delay starts doubling.
    pub max_reconnect_attempts: u32,
    /// Ceiling for the doubled delay.
    pub max_reconnect_delay: Duration,
}

impl Default for TriggerListenerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// Listener statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Whether a session is currently running.
    pub connected: bool,
    /// Sessions started after the first one.
    pub reconnects: u64,
    /// Markers received across all sessions.
    pub markers_received: u64,
    /// Sessions in a row that ended without a marker.
    pub consecutive_failures: u32,
}

/// Keeps a [`TriggerFeed`] connected and forwards its markers.
///
/// A session that delivered at least one marker resets the failure count.
/// Once `max_reconnect_attempts` sessions in a row fail the operator is
/// alerted and the delay backs off up to `max_reconnect_delay`, but the
/// listener keeps reconnecting until its sink is closed.
pub struct TriggerListener {
    /// Upstream feed.
    feed: Arc<dyn TriggerFeed>,
    /// Configuration.
    config: TriggerListenerConfig,
    /// Outage alerts.
    notifier: Arc<dyn Notifier>,
    /// Live statistics.
    stats: RwLock<ListenerStats>,
}

impl TriggerListener {
    /// Creates a new listener.
    pub fn new(
        feed: Arc<dyn TriggerFeed>,
        config: TriggerListenerConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            feed,
            config,
            notifier,
            stats: RwLock::new(ListenerStats::default()),
        }
    }

    pub async fn stats(&self) -> ListenerStats {
        *self.stats.read().await
    }

    fn delay_after(&self, failures: u32) -> Duration {
        let base = self.config.reconnect_delay;
        let Some(over) = failures.checked_sub(self.config.max_reconnect_attempts) else {
            return base;
        };
        let factor = 2u32.checked_pow(over.saturating_add(1)).unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(self.config.max_reconnect_delay.max(base))
    }

    /// Runs sessions until `sink` is closed.
    pub async fn run(&self, sink: mpsc::Sender<Trigger>) {
        let feed = self.feed.name().to_string();
        info!(feed = %feed, "Starting trigger listener");
        let mut failures = 0u32;
        let mut first_session = true;

        loop {
            if sink.is_closed() {
                break;
            }

            {
                let mut stats = self.stats.write().await;
                stats.connected = true;
                if !first_session {
                    stats.reconnects += 1;
                }
            }
            first_session = false;

            let result = self.feed.run_session(&sink).await;

            match &result {
                Ok(received) if *received > 0 => {
                    if failures >= self.config.max_reconnect_attempts {
                        info!(feed = %feed, failures = failures, "Trigger feed restored");
                        notify_best_effort(
                            self.notifier.as_ref(),
                            "Trigger feed restored",
                            &format!("{feed} delivering again after {failures} failed sessions"),
                        )
                        .await;
                    }
                    failures = 0;
                    warn!(feed = %feed, received = *received, "Trigger session ended");
                }
                Ok(_) => {
                    failures = failures.saturating_add(1);
                    warn!(feed = %feed, "Trigger session ended without delivering a marker");
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    error!(feed = %feed, error = %e, "Trigger session failed");
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.connected = false;
                stats.consecutive_failures = failures;
                if let Ok(received) = result {
                    stats.markers_received += received;
                }
            }

            if sink.is_closed() {
                break;
            }

            if failures == self.config.max_reconnect_attempts {
                error!(feed = %feed, attempts = failures, "Trigger feed down, backing off");
                notify_best_effort(
                    self.notifier.as_ref(),
                    "Trigger feed down",
                    &format!("{feed} failed {failures} sessions in a row; still reconnecting"),
                )
                .await;
            }

            let delay = self.delay_after(failures);
            warn!(
                feed = %feed,
                attempts = failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting..."
            );
            tokio::time::sleep(delay).await;
        }

        info!(feed = %feed, "Trigger sink closed, listener stopped");
    }
}
