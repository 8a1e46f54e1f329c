//! Safe-mode circuit breaker.
//!
//! Unlike a recovering circuit breaker this one has no half-open state: once
//! tripped it stays open until the process is restarted by an operator.

use crate::alerts::{Notifier, notify_best_effort};
use crate::error::KeeperError;
use crate::hedge::HedgeService;
use crate::retry::{RetryPolicy, with_retry};
use crate::scheduler::ModeCell;
use chrono::{DateTime, Utc};
use clmm_keeper_domain::entities::PositionId;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Result of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Safe mode is (now) active.
    Tripped,
}

/// Breaker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafeModeStats {
    /// Whether the breaker has tripped.
    pub tripped: bool,
    /// When it tripped.
    pub tripped_at: Option<DateTime<Utc>>,
    /// Why it tripped.
    pub reason: Option<String>,
}

/// Moves the keeper into safe mode on a negative health verdict.
pub struct SafeModeBreaker {
    /// Source of health verdicts.
    hedge: Arc<dyn HedgeService>,
    /// Operator alerts.
    notifier: Arc<dyn Notifier>,
    /// Retry policy for health checks.
    retry: RetryPolicy,
    /// Trip details.
    stats: RwLock<SafeModeStats>,
}

impl SafeModeBreaker {
    /// Creates a new breaker.
    pub fn new(
        hedge: Arc<dyn HedgeService>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            hedge,
            notifier,
            retry,
            stats: RwLock::new(SafeModeStats::default()),
        }
    }

    /// Asks the hedge service whether `position` may still be managed.
    ///
    /// A transport failure is an error, not a verdict: the caller abandons
    /// the evaluation and the next trigger asks again.
    pub async fn check(
        &self,
        mode: &ModeCell,
        position: &PositionId,
    ) -> Result<HealthVerdict, KeeperError> {
        if mode.is_safe_mode() {
            return Ok(HealthVerdict::Tripped);
        }

        let hedge = &self.hedge;
        let healthy = with_retry(&self.retry, "health check", || {
            hedge.check_health(position)
        })
        .await?;
        if healthy {
            debug!(position = %position, "Health check passed");
            return Ok(HealthVerdict::Healthy);
        }

        let panic = KeeperError::RiskPanic {
            position: position.clone(),
        };
        self.trip(mode, &panic.to_string()).await;
        Ok(HealthVerdict::Tripped)
    }

    /// Enters safe mode. Repeated trips keep the first reason.
    pub async fn trip(&self, mode: &ModeCell, reason: &str) {
        if !mode.enter_safe_mode() {
            return;
        }

        {
            let mut stats = self.stats.write().await;
            stats.tripped = true;
            stats.tripped_at = Some(Utc::now());
            stats.reason = Some(reason.to_string());
        }

        error!(reason = reason, "Safe mode entered, automated actions halted");
        notify_best_effort(
            self.notifier.as_ref(),
            "Keeper entered safe mode",
            &format!("{reason}. Manual intervention required."),
        )
        .await;
    }

    pub async fn stats(&self) -> SafeModeStats {
        self.stats.read().await.clone()
    }
}
