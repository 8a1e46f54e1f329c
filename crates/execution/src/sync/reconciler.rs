//! Orphan recovery from the ledger.

use crate::alerts::notify_best_effort;
use crate::context::KeeperContext;
use crate::error::KeeperError;
use clmm_keeper_domain::entities::PositionId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Position adopted as the tracked one, already persisted.
    pub recovered: Option<PositionId>,
    /// Other owned positions the keeper will not manage.
    pub untracked: Vec<PositionId>,
}

/// Rebuilds the local record from positions owned on the ledger.
///
/// Runs whenever the local record says there is no position, which covers a
/// crash between a settled mint and the save that should have followed it.
pub struct Reconciler {
    /// Shared dependencies.
    ctx: Arc<KeeperContext>,
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(ctx: Arc<KeeperContext>) -> Self {
        Self { ctx }
    }

    /// Adopts the last position owned by `account`, in ledger enumeration
    /// order, and persists it before returning.
    pub async fn find_owned_position(
        &self,
        account: &str,
    ) -> Result<ReconcileOutcome, KeeperError> {
        let reader = &self.ctx.reader;
        let owned = self
            .ctx
            .harness
            .read("enumerate owned positions", || reader.owned_positions(account))
            .await?;

        let Some((recovered, rest)) = owned.split_last() else {
            debug!(account = account, "No owned positions found");
            return Ok(ReconcileOutcome::default());
        };

        self.ctx.store.save(Some(recovered))?;
        info!(position = %recovered, "Recovered orphan position");

        if !rest.is_empty() {
            let untracked = rest
                .iter()
                .map(PositionId::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(
                count = rest.len(),
                tracked = %recovered,
                untracked = %untracked,
                "Account owns several positions, only the last one is managed"
            );
            notify_best_effort(
                self.ctx.notifier.as_ref(),
                "Untracked positions",
                &format!("tracking {recovered}; not managing {untracked}"),
            )
            .await;
        }

        Ok(ReconcileOutcome {
            recovered: Some(recovered.clone()),
            untracked: rest.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, MockHedge, MockLedger, id};

    #[tokio::test]
    async fn test_no_owned_positions() {
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        let outcome = Reconciler::new(fx.ctx.clone())
            .find_owned_position("owner")
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(fx.ctx.store.load().position_id, None);
    }

    #[tokio::test]
    async fn test_recovery_is_persisted_before_returning() {
        let orphan = id("Orphan1");
        let fx = Fixture::new(
            MockLedger::new().with_position(&orphan, 100, 200),
            MockHedge::healthy(),
        );

        let outcome = Reconciler::new(fx.ctx.clone())
            .find_owned_position("owner")
            .await
            .unwrap();

        assert_eq!(outcome.recovered, Some(orphan.clone()));
        assert_eq!(fx.ctx.store.load().position_id, Some(orphan));
        assert_eq!(fx.ledger.writes(), 0);
        assert!(fx.notifier.subjects().is_empty());
    }

    #[tokio::test]
    async fn test_last_enumerated_position_wins() {
        let (first, second) = (id("First"), id("Second"));
        let fx = Fixture::new(
            MockLedger::new()
                .with_position(&first, 100, 200)
                .with_position(&second, 300, 400),
            MockHedge::healthy(),
        );

        let outcome = Reconciler::new(fx.ctx.clone())
            .find_owned_position("owner")
            .await
            .unwrap();

        assert_eq!(outcome.recovered, Some(second.clone()));
        assert_eq!(outcome.untracked, vec![first]);
        assert_eq!(fx.ctx.store.load().position_id, Some(second));
        assert_eq!(fx.notifier.subjects(), vec!["Untracked positions"]);
    }
}
