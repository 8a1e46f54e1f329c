//! Position state machine and trigger handling.
//!
//! Every trigger runs at most one evaluation: load the record, recover an
//! orphan if the record is empty, check health, then hold, hedge or
//! rebalance. Overlapping triggers are dropped by a single-flight guard.

mod interval;
mod mode;
mod single_flight;

pub use interval::IntervalTrigger;
pub use mode::ModeCell;
pub use single_flight::{FlightGuard, SingleFlight};

use crate::context::KeeperContext;
use crate::emergency::{HealthVerdict, SafeModeBreaker};
use crate::error::KeeperError;
use crate::hedge::position_exposure;
use crate::retry::with_retry;
use crate::strategy::{RebalanceConfig, RebalanceEngine, RebalanceOutcome};
use crate::sync::Reconciler;
use clmm_keeper_domain::entities::{PoolSnapshot, PositionId, RangePosition};
use clmm_keeper_domain::enums::SystemMode;
use clmm_keeper_protocols::prelude::{LedgerError, Trigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the keeper loop.
#[derive(Debug, Clone, Copy)]
pub struct KeeperConfig {
    /// Minimum time between hedge adjustments. `None` disables them.
    pub hedge_interval: Option<Duration>,
    /// Only markers divisible by this value start an evaluation.
    pub evaluate_every: u64,
    /// Rebalance parameters.
    pub rebalance: RebalanceConfig,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            hedge_interval: Some(Duration::from_secs(300)),
            evaluate_every: 1,
            rebalance: RebalanceConfig::default(),
        }
    }
}

/// What a completed evaluation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Position in range, nothing to do.
    Holding,
    /// Out of range position replaced.
    Rebalanced(RebalanceOutcome),
    /// No position existed, a new one was opened.
    Opened(RebalanceOutcome),
    /// Health check failed, automation halted.
    SafeModeEntered,
}

/// What happened to a trigger.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// Another evaluation was running.
    Dropped,
    /// Safe mode is active.
    Suppressed,
    Completed(EvaluationOutcome),
    /// Evaluation abandoned; the next trigger starts from fresh state.
    Failed(KeeperError),
}

/// Rate limit for hedge adjustments.
struct HedgeGate {
    interval: Option<Duration>,
    last_adjusted: Mutex<Option<Instant>>,
}

impl HedgeGate {
    fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_adjusted: Mutex::new(None),
        }
    }

    async fn is_due(&self) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        match *self.last_adjusted.lock().await {
            Some(last) => last.elapsed() >= interval,
            None => true,
        }
    }

    async fn mark(&self) {
        *self.last_adjusted.lock().await = Some(Instant::now());
    }
}

/// The position state machine.
pub struct Keeper {
    /// Shared dependencies.
    ctx: Arc<KeeperContext>,
    /// Configuration.
    config: KeeperConfig,
    /// Current mode.
    mode: ModeCell,
    /// Evaluation guard.
    flight: SingleFlight,
    /// Orphan recovery.
    reconciler: Reconciler,
    /// Rebalance protocol.
    engine: RebalanceEngine,
    /// Health gate.
    breaker: SafeModeBreaker,
    /// Hedge rate limit.
    hedge_gate: HedgeGate,
}

impl Keeper {
    /// Creates a new keeper in `SCANNING` mode.
    pub fn new(ctx: Arc<KeeperContext>, config: KeeperConfig) -> Self {
        let breaker = SafeModeBreaker::new(
            ctx.hedge.clone(),
            ctx.notifier.clone(),
            ctx.harness.retry,
        );
        Self {
            reconciler: Reconciler::new(ctx.clone()),
            engine: RebalanceEngine::new(ctx.clone(), config.rebalance),
            breaker,
            hedge_gate: HedgeGate::new(config.hedge_interval),
            mode: ModeCell::default(),
            flight: SingleFlight::new(),
            ctx,
            config,
        }
    }

    pub fn mode(&self) -> SystemMode {
        self.mode.get()
    }

    pub fn breaker(&self) -> &SafeModeBreaker {
        &self.breaker
    }

    /// Handles one trigger.
    pub async fn on_trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let Some(_guard) = self.flight.try_acquire() else {
            debug!(trigger = %trigger, "Evaluation in progress, dropping trigger");
            return TriggerOutcome::Dropped;
        };

        if self.mode.is_safe_mode() {
            debug!(trigger = %trigger, "Safe mode active, trigger suppressed");
            return TriggerOutcome::Suppressed;
        }

        match self.evaluate().await {
            Ok(outcome) => {
                info!(
                    trigger = %trigger,
                    mode = %self.mode.get(),
                    outcome = ?outcome,
                    "Evaluation complete"
                );
                TriggerOutcome::Completed(outcome)
            }
            Err(e) => {
                error!(
                    trigger = %trigger,
                    kind = ?e.kind(),
                    mode = %self.mode.get(),
                    error = %e,
                    "Evaluation failed"
                );
                TriggerOutcome::Failed(e)
            }
        }
    }

    async fn evaluate(&self) -> Result<EvaluationOutcome, KeeperError> {
        let ctx = &self.ctx;
        let mut tracked = ctx.store.load().position_id;

        if tracked.is_none() {
            tracked = self
                .reconciler
                .find_owned_position(&ctx.account)
                .await?
                .recovered;
        }

        if let Some(id) = tracked {
            match ctx
                .harness
                .read("read position", || ctx.reader.position(&id))
                .await
            {
                Ok(position) => return self.evaluate_tracked(&id, &position).await,
                Err(KeeperError::Ledger(LedgerError::NotFound(_))) => {
                    warn!(position = %id, "Tracked position no longer exists, clearing record");
                    ctx.store.save(None)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.mode.transition(SystemMode::Scanning);
        info!("No tracked position, opening a new one");
        let outcome = self.engine.execute(None).await?;
        self.mode.transition(SystemMode::Active);
        Ok(EvaluationOutcome::Opened(outcome))
    }

    async fn evaluate_tracked(
        &self,
        id: &PositionId,
        position: &RangePosition,
    ) -> Result<EvaluationOutcome, KeeperError> {
        if self.breaker.check(&self.mode, id).await? == HealthVerdict::Tripped {
            return Ok(EvaluationOutcome::SafeModeEntered);
        }
        self.mode.transition(SystemMode::Active);

        let reader = &self.ctx.reader;
        let snapshot = self
            .ctx
            .harness
            .read("read pool", || reader.pool_snapshot())
            .await?;

        if position.is_in_range(snapshot.current_tick) {
            debug!(
                position = %id,
                tick = snapshot.current_tick,
                range = %position.range(),
                "Position in range"
            );
            self.adjust_hedge(id, position, &snapshot).await?;
            return Ok(EvaluationOutcome::Holding);
        }

        info!(
            position = %id,
            tick = snapshot.current_tick,
            range = %position.range(),
            "Position out of range, rebalancing"
        );
        match self.engine.execute(Some(id)).await {
            Ok(outcome) => {
                self.mode.transition(SystemMode::Active);
                Ok(EvaluationOutcome::Rebalanced(outcome))
            }
            Err(e) => {
                self.mode.transition(SystemMode::Scanning);
                Err(e)
            }
        }
    }

    async fn adjust_hedge(
        &self,
        id: &PositionId,
        position: &RangePosition,
        snapshot: &PoolSnapshot,
    ) -> Result<(), KeeperError> {
        if !self.hedge_gate.is_due().await {
            return Ok(());
        }

        let exposure = position_exposure(snapshot, position)?;
        let hedge = &self.ctx.hedge;
        with_retry(&self.ctx.harness.retry, "adjust hedge", || {
            hedge.adjust_hedge(exposure, id)
        })
        .await?;
        self.hedge_gate.mark().await;
        info!(position = %id, exposure = %exposure, "Hedge adjusted");
        Ok(())
    }

    /// Consumes triggers until the channel closes, then waits for the
    /// evaluation in flight.
    ///
    /// Each trigger gets its own task so that overlapping triggers meet the
    /// single-flight guard instead of queueing behind the channel.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<Trigger>) {
        info!(
            mode = %self.mode.get(),
            evaluate_every = self.config.evaluate_every,
            "Keeper started"
        );
        let stride = self.config.evaluate_every.max(1);
        let mut tasks = JoinSet::new();

        while let Some(trigger) = triggers.recv().await {
            while let Some(result) = tasks.try_join_next() {
                reap(result);
            }

            if trigger.marker % stride != 0 {
                continue;
            }
            let keeper = Arc::clone(&self);
            tasks.spawn(async move { keeper.on_trigger(trigger).await });
        }

        while let Some(result) = tasks.join_next().await {
            reap(result);
        }
        info!("Trigger channel closed, keeper stopped");
    }
}

fn reap(result: Result<TriggerOutcome, JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Evaluation task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Fixture, MockHedge, MockLedger, id};
    use std::sync::atomic::Ordering;

    fn keeper(fx: &Fixture) -> Arc<Keeper> {
        Arc::new(Keeper::new(fx.ctx.clone(), KeeperConfig::default()))
    }

    fn trigger(marker: u64) -> Trigger {
        Trigger { marker }
    }

    #[tokio::test]
    async fn test_orphan_out_of_range_is_rebalanced_once() {
        // Local record empty, ledger holds [100, 200), pool at tick 500.
        let orphan = id("Orphan1");
        let fx = Fixture::new(
            MockLedger::new().with_position(&orphan, 100, 200),
            MockHedge::healthy(),
        );
        let keeper = keeper(&fx);

        let outcome = keeper.on_trigger(trigger(1)).await;

        let result = match outcome {
            TriggerOutcome::Completed(EvaluationOutcome::Rebalanced(result)) => result,
            other => panic!("expected a rebalance, got {other:?}"),
        };
        assert_eq!(result.exited, Some(orphan.clone()));
        assert_ne!(result.position, orphan);
        assert_eq!(fx.ctx.store.load().position_id, Some(result.position));
        assert_eq!(fx.ledger.state().mints.len(), 1);
        assert_eq!(keeper.mode(), SystemMode::Active);
    }

    #[tokio::test]
    async fn test_in_range_position_holds_and_hedges_once_per_interval() {
        let tracked = id("Tracked");
        let fx = Fixture::new(
            MockLedger::new().with_position(&tracked, 0, 1000),
            MockHedge::healthy(),
        );
        fx.ctx.store.save(Some(&tracked)).unwrap();
        let keeper = keeper(&fx);

        for marker in 1..=3 {
            let outcome = keeper.on_trigger(trigger(marker)).await;
            assert!(matches!(
                outcome,
                TriggerOutcome::Completed(EvaluationOutcome::Holding)
            ));
        }

        assert_eq!(fx.ledger.writes(), 0);
        assert_eq!(fx.hedge.adjustments.lock().unwrap().len(), 1);
        assert_eq!(keeper.mode(), SystemMode::Active);
    }

    #[tokio::test]
    async fn test_empty_account_opens_position() {
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        let keeper = keeper(&fx);

        let outcome = keeper.on_trigger(trigger(1)).await;

        let result = match outcome {
            TriggerOutcome::Completed(EvaluationOutcome::Opened(result)) => result,
            other => panic!("expected an open, got {other:?}"),
        };
        assert_eq!(result.exited, None);
        assert_eq!(fx.ctx.store.load().position_id, Some(result.position));
        assert_eq!(keeper.mode(), SystemMode::Active);
    }

    #[tokio::test]
    async fn test_vanished_position_is_cleared_then_reopened() {
        let gone = id("Gone");
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        fx.ctx.store.save(Some(&gone)).unwrap();
        let keeper = keeper(&fx);

        let outcome = keeper.on_trigger(trigger(1)).await;

        assert!(matches!(
            outcome,
            TriggerOutcome::Completed(EvaluationOutcome::Opened(_))
        ));
        assert_ne!(fx.ctx.store.load().position_id, Some(gone));
    }

    #[tokio::test]
    async fn test_safe_mode_blocks_all_mutation() {
        let tracked = id("Tracked");
        let fx = Fixture::new(
            // Out of range: a healthy verdict would rebalance.
            MockLedger::new().with_position(&tracked, 100, 200),
            MockHedge::unhealthy(),
        );
        fx.ctx.store.save(Some(&tracked)).unwrap();
        let keeper = keeper(&fx);

        let outcome = keeper.on_trigger(trigger(1)).await;
        assert!(matches!(
            outcome,
            TriggerOutcome::Completed(EvaluationOutcome::SafeModeEntered)
        ));
        assert_eq!(keeper.mode(), SystemMode::SafeMode);
        let reads_at_trip = fx.ledger.reads();

        fx.hedge.healthy.store(true, Ordering::SeqCst);
        for marker in 2..=5 {
            assert!(matches!(
                keeper.on_trigger(trigger(marker)).await,
                TriggerOutcome::Suppressed
            ));
        }

        assert_eq!(fx.ledger.writes(), 0);
        assert_eq!(fx.ledger.reads(), reads_at_trip);
        assert_eq!(fx.ctx.store.load().position_id, Some(tracked));
        assert_eq!(fx.notifier.subjects(), vec!["Keeper entered safe mode"]);
        assert!(keeper.breaker().stats().await.tripped);
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_dropped() {
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        let keeper = keeper(&fx);
        let (entered, release) = fx.ledger.hold_enumeration();

        let first = tokio::spawn({
            let keeper = keeper.clone();
            async move { keeper.on_trigger(trigger(1)).await }
        });
        entered.notified().await;

        assert!(matches!(
            keeper.on_trigger(trigger(2)).await,
            TriggerOutcome::Dropped
        ));

        release.notify_one();
        assert!(matches!(
            first.await.unwrap(),
            TriggerOutcome::Completed(EvaluationOutcome::Opened(_))
        ));
        assert_eq!(fx.ledger.state().mints.len(), 1);
    }

    #[tokio::test]
    async fn test_guard_released_after_failure() {
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        fx.ledger.state().fail_reads = Some(LedgerError::Decode("garbage".into()));
        let keeper = keeper(&fx);

        let outcome = keeper.on_trigger(trigger(1)).await;
        let err = match outcome {
            TriggerOutcome::Failed(err) => err,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);

        fx.ledger.state().fail_reads = None;
        assert!(matches!(
            keeper.on_trigger(trigger(2)).await,
            TriggerOutcome::Completed(EvaluationOutcome::Opened(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_rebalance_reverts_to_scanning() {
        let tracked = id("Tracked");
        let fx = Fixture::new(
            MockLedger::new().with_position(&tracked, 100, 200),
            MockHedge::healthy(),
        );
        fx.ctx.store.save(Some(&tracked)).unwrap();
        fx.ledger.state().fail_submit = Some((
            clmm_keeper_protocols::prelude::SubmissionKind::Exit,
            LedgerError::Rpc("node unavailable".into()),
        ));
        let keeper = keeper(&fx);

        let outcome = keeper.on_trigger(trigger(1)).await;

        assert!(matches!(outcome, TriggerOutcome::Failed(_)));
        assert_eq!(keeper.mode(), SystemMode::Scanning);
        assert_eq!(fx.ctx.store.load().position_id, Some(tracked));
    }

    #[tokio::test]
    async fn test_run_applies_stride_and_drains_on_close() {
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        let keeper = Arc::new(Keeper::new(
            fx.ctx.clone(),
            KeeperConfig {
                evaluate_every: 5,
                ..KeeperConfig::default()
            },
        ));
        let (tx, rx) = mpsc::channel(8);

        for marker in 1..=4 {
            tx.send(trigger(marker)).await.unwrap();
        }
        drop(tx);
        keeper.clone().run(rx).await;

        // No marker was a multiple of the stride.
        assert_eq!(fx.ledger.reads(), 0);

        let (tx, rx) = mpsc::channel(8);
        tx.send(trigger(5)).await.unwrap();
        drop(tx);
        keeper.run(rx).await;
        assert_eq!(fx.ledger.state().mints.len(), 1);
    }

    #[tokio::test]
    async fn test_run_survives_panicking_evaluation() {
        let fx = Fixture::new(MockLedger::new(), MockHedge::healthy());
        fx.ledger.state().panic_on_enumerate = true;
        let keeper = keeper(&fx);
        let (tx, rx) = mpsc::channel(8);
        let runner = tokio::spawn(keeper.clone().run(rx));

        tx.send(trigger(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!keeper.flight.is_busy());

        fx.ledger.state().panic_on_enumerate = false;
        tx.send(trigger(2)).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        assert_eq!(fx.ledger.state().mints.len(), 1);
        assert_eq!(keeper.mode(), SystemMode::Active);
    }
}
