//! Rebalancing execution logic.
//!
//! A rebalance runs four phases in order: exit the old position, swap the
//! wallet back to an even split by value, compute a fresh range around the
//! post-swap tick, and mint into it. A failure in any phase aborts the rest
//! and leaves the persisted record as the last completed phase wrote it.

use crate::alerts::notify_best_effort;
use crate::context::KeeperContext;
use crate::error::KeeperError;
use clmm_keeper_domain::DomainError;
use clmm_keeper_domain::entities::{PoolSnapshot, PositionId};
use clmm_keeper_domain::math::concentrated_liquidity::{
    amounts_for_liquidity, max_liquidity_for_amounts,
};
use clmm_keeper_domain::math::price_tick::tick_to_sqrt_price;
use clmm_keeper_domain::math::tick_range::{TickLimits, TickRange, compute_range};
use clmm_keeper_domain::value_objects::Percentage;
use clmm_keeper_protocols::prelude::*;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Configuration for rebalancing.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceConfig {
    /// Ticks on each side of the current tick.
    pub half_width: i32,
    /// Protocol tick bounds.
    pub tick_limits: TickLimits,
    /// Smallest deviation, in token B units, worth a swap.
    pub min_swap_value: Decimal,
    /// Tolerance applied to the quoted swap output.
    pub swap_slippage: Percentage,
    /// Tolerance applied to the required mint deposits.
    pub mint_slippage: Percentage,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            half_width: 2000,
            tick_limits: TickLimits::default(),
            min_swap_value: Decimal::TWO,
            swap_slippage: Percentage::from_bps(50), // 0.5%
            mint_slippage: Percentage::from_bps(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalancePhase {
    Exit,
    Rebalance,
    Range,
    Mint,
}

impl fmt::Display for RebalancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exit => "exit",
            Self::Rebalance => "rebalance",
            Self::Range => "range",
            Self::Mint => "mint",
        };
        f.write_str(label)
    }
}

/// Result of a completed rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceOutcome {
    /// Position closed in the exit phase.
    pub exited: Option<PositionId>,
    /// Swap executed in the rebalance phase.
    pub swap: Option<SwapOrder>,
    /// Range of the new position.
    pub range: TickRange,
    /// Newly minted position, already persisted.
    pub position: PositionId,
    /// Liquidity deposited into the new position.
    pub liquidity: u128,
}

/// Executes the four-phase rebalance protocol.
pub struct RebalanceEngine {
    /// Shared dependencies.
    ctx: Arc<KeeperContext>,
    /// Configuration.
    config: RebalanceConfig,
}

impl RebalanceEngine {
    /// Creates a new rebalance engine.
    pub fn new(ctx: Arc<KeeperContext>, config: RebalanceConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Runs the protocol. Without `existing` the exit phase is skipped.
    pub async fn execute(
        &self,
        existing: Option<&PositionId>,
    ) -> Result<RebalanceOutcome, KeeperError> {
        if let Some(position) = existing {
            info!(phase = %RebalancePhase::Exit, position = %position, "Exiting position");
            self.exit(position).await?;
        }

        info!(phase = %RebalancePhase::Rebalance, "Rebalancing wallet");
        let swap = self.rebalance().await?;

        info!(phase = %RebalancePhase::Range, "Computing range");
        let (snapshot, range) = self.range().await?;

        info!(phase = %RebalancePhase::Mint, range = %range, "Minting position");
        let (position, liquidity) = self.mint(&snapshot, range).await?;

        info!(
            position = %position,
            range = %range,
            liquidity = liquidity,
            "Rebalance complete"
        );

        Ok(RebalanceOutcome {
            exited: existing.cloned(),
            swap,
            range,
            position,
            liquidity,
        })
    }

    async fn exit(&self, position: &PositionId) -> Result<(), KeeperError> {
        let ctx = &self.ctx;
        let current = ctx
            .harness
            .read("read position", || ctx.reader.position(position))
            .await?;

        let plan = ExitPlan {
            position: position.clone(),
            liquidity: current.liquidity,
            min_amount_a: 0,
            min_amount_b: 0,
        };

        if ctx.writer.supports_batched_exit() {
            let pending = ctx
                .harness
                .submit("submit exit", || ctx.writer.submit_exit(&plan))
                .await?;
            ctx.harness
                .settle("settle exit", ctx.writer.as_ref(), &pending)
                .await?;
        } else {
            self.exit_sequential(&plan).await?;
        }

        ctx.store.save(None)?;
        info!(position = %position, "Position closed");
        Ok(())
    }

    async fn exit_sequential(&self, plan: &ExitPlan) -> Result<(), KeeperError> {
        let mut steps = Vec::with_capacity(3);
        if plan.liquidity > 0 {
            steps.push(SubmissionKind::Withdraw);
        }
        steps.extend([SubmissionKind::Collect, SubmissionKind::Burn]);

        let mut completed = Vec::with_capacity(steps.len());
        for step in steps {
            if let Err(e) = self.exit_step(step, plan).await {
                error!(
                    position = %plan.position,
                    failed = %step,
                    completed = ?completed,
                    error = %e,
                    "Exit stopped partway"
                );
                return Err(KeeperError::PartialExit {
                    position: plan.position.clone(),
                    completed,
                    failed: step,
                    source: Box::new(e),
                });
            }
            debug!(position = %plan.position, step = %step, "Exit step settled");
            completed.push(step);
        }
        Ok(())
    }

    async fn exit_step(&self, step: SubmissionKind, plan: &ExitPlan) -> Result<(), KeeperError> {
        let ctx = &self.ctx;
        let writer = &ctx.writer;
        let position = &plan.position;
        let pending = match step {
            SubmissionKind::Withdraw => {
                ctx.harness
                    .submit("submit withdraw", || {
                        writer.submit_withdraw(
                            position,
                            plan.liquidity,
                            plan.min_amount_a,
                            plan.min_amount_b,
                        )
                    })
                    .await?
            }
            SubmissionKind::Collect => {
                ctx.harness
                    .submit("submit collect", || writer.submit_collect(position))
                    .await?
            }
            SubmissionKind::Burn => {
                ctx.harness
                    .submit("submit burn", || writer.submit_burn(position))
                    .await?
            }
            other => {
                return Err(KeeperError::ProtocolInvariantViolation(format!(
                    "{other} is not an exit step"
                )));
            }
        };
        ctx.harness
            .settle("settle exit step", writer.as_ref(), &pending)
            .await?;
        Ok(())
    }

    /// Swaps the excess token so both sides hold equal value. Returns the
    /// executed order, or `None` when the deviation is below the threshold.
    async fn rebalance(&self) -> Result<Option<SwapOrder>, KeeperError> {
        let ctx = &self.ctx;
        let reader = &ctx.reader;
        let (balances, snapshot) = tokio::try_join!(
            ctx.harness.read("read balances", || reader.balances()),
            ctx.harness.read("read pool", || reader.pool_snapshot()),
        )?;

        if snapshot.current_price <= Decimal::ZERO {
            return Err(DomainError::NonPositivePrice.into());
        }

        let (value_a, value_b) = snapshot.value_in_b(&balances);
        let deviation = (value_a - value_b) / Decimal::TWO;
        let excess_a = deviation
            .checked_div(snapshot.current_price)
            .ok_or(DomainError::Overflow("swap size"))?;
        if deviation.abs() < self.config.min_swap_value {
            info!(
                deviation = %deviation,
                threshold = %self.config.min_swap_value,
                "Deviation below threshold, skipping swap"
            );
            return Ok(None);
        }

        let a_to_b = deviation > Decimal::ZERO;
        let amount_in = if a_to_b {
            snapshot
                .raw_amount_a(excess_a)
                .min(balances.amount_a)
        } else {
            snapshot
                .raw_amount_b(deviation.abs())
                .min(balances.amount_b)
        };
        if amount_in == 0 {
            debug!(deviation = %deviation, "Swap rounds to zero, skipping");
            return Ok(None);
        }

        let quoted = ctx
            .harness
            .read("quote swap", || reader.quote_swap(a_to_b, amount_in))
            .await?;
        let order = SwapOrder {
            a_to_b,
            amount_in,
            min_amount_out: self.config.swap_slippage.deduct_from(quoted),
        };

        info!(
            a_to_b = a_to_b,
            amount_in = amount_in,
            quoted = quoted,
            min_amount_out = order.min_amount_out,
            deviation = %deviation,
            "Swapping excess token"
        );
        let pending = ctx
            .harness
            .submit("submit swap", || ctx.writer.submit_swap(&order))
            .await?;
        ctx.harness
            .settle("settle swap", ctx.writer.as_ref(), &pending)
            .await?;

        Ok(Some(order))
    }

    /// Reads the post-swap pool state and centers a range on it.
    async fn range(&self) -> Result<(PoolSnapshot, TickRange), KeeperError> {
        let reader = &self.ctx.reader;
        let snapshot = self
            .ctx
            .harness
            .read("read pool", || reader.pool_snapshot())
            .await?;
        let range = compute_range(
            snapshot.current_tick,
            snapshot.tick_spacing,
            self.config.half_width,
            self.config.tick_limits,
        )?;
        debug!(tick = snapshot.current_tick, range = %range, "Range computed");
        Ok((snapshot, range))
    }

    async fn mint(
        &self,
        snapshot: &PoolSnapshot,
        range: TickRange,
    ) -> Result<(PositionId, u128), KeeperError> {
        let ctx = &self.ctx;
        let reader = &ctx.reader;
        let balances = ctx
            .harness
            .read("read balances", || reader.balances())
            .await?;

        let sqrt_lower = tick_to_sqrt_price(range.lower)?;
        let sqrt_upper = tick_to_sqrt_price(range.upper)?;
        let max_liquidity = max_liquidity_for_amounts(
            snapshot.sqrt_price,
            sqrt_lower,
            sqrt_upper,
            u128::from(balances.amount_a),
            u128::from(balances.amount_b),
        )?;
        // Headroom for on-chain rounding of the required amounts.
        let liquidity = max_liquidity - max_liquidity / 10_000;
        if liquidity == 0 {
            return Err(KeeperError::NothingToDeposit {
                amount_a: balances.amount_a,
                amount_b: balances.amount_b,
            });
        }

        let (required_a, required_b) =
            amounts_for_liquidity(snapshot.sqrt_price, sqrt_lower, sqrt_upper, liquidity)?;
        let required_a = clamp_to(required_a, balances.amount_a);
        let required_b = clamp_to(required_b, balances.amount_b);

        let slippage = self.config.mint_slippage;
        let order = MintOrder {
            range,
            liquidity,
            amount_a_max: slippage.add_to(required_a).min(balances.amount_a),
            amount_b_max: slippage.add_to(required_b).min(balances.amount_b),
            amount_a_min: slippage.deduct_from(required_a),
            amount_b_min: slippage.deduct_from(required_b),
        };

        let pending = ctx
            .harness
            .submit("submit mint", || ctx.writer.submit_mint(&order))
            .await?;
        let receipt = ctx
            .harness
            .settle("settle mint", ctx.writer.as_ref(), &pending)
            .await?;

        let position = match opened_position(&receipt) {
            Ok(position) => position,
            Err(e) => {
                error!(
                    handle = %receipt.handle,
                    error = %e,
                    "Mint settled without a usable position"
                );
                notify_best_effort(
                    ctx.notifier.as_ref(),
                    "Mint needs manual recovery",
                    &format!("{e}; funds may sit in an untracked position"),
                )
                .await;
                return Err(e);
            }
        };

        ctx.store.save(Some(&position))?;
        Ok((position, liquidity))
    }
}

fn clamp_to(required: u128, available: u64) -> u64 {
    u64::try_from(required).unwrap_or(u64::MAX).min(available)
}

/// Extracts the new position from a mint receipt.
///
/// Exactly one `PositionOpened` event is accepted.
fn opened_position(receipt: &SubmissionReceipt) -> Result<PositionId, KeeperError> {
    let opened: Vec<&PositionId> = receipt
        .events
        .iter()
        .map(|event| match event {
            LedgerEvent::PositionOpened { position } => position,
        })
        .collect();

    match opened.as_slice() {
        [position] => Ok((*position).clone()),
        other => Err(KeeperError::ProtocolInvariantViolation(format!(
            "mint {} settled with {} PositionOpened events",
            receipt.handle,
            other.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Fixture, MockHedge, MockLedger, id, snapshot_at};
    use clmm_keeper_domain::entities::TokenBalances;

    fn fixture(ledger: MockLedger) -> (Fixture, RebalanceEngine) {
        let fx = Fixture::new(ledger, MockHedge::healthy());
        let engine = RebalanceEngine::new(fx.ctx.clone(), RebalanceConfig::default());
        (fx, engine)
    }

    /// Price 1 pool with the given UI balances (6 decimals each).
    fn even_price_ledger(a: u64, b: u64) -> MockLedger {
        let ledger = MockLedger::new();
        {
            let mut state = ledger.state();
            state.snapshot = snapshot_at(0);
            state.balances = TokenBalances::new(a, b);
        }
        ledger
    }

    #[tokio::test]
    async fn test_small_deviation_skips_swap() {
        // $101.50 vs $98.50: deviation of $1.50 against a $2 threshold.
        let (fx, engine) = fixture(even_price_ledger(101_500_000, 98_500_000));

        let swap = engine.rebalance().await.unwrap();

        assert_eq!(swap, None);
        assert_eq!(fx.ledger.writes(), 0);
        assert_eq!(
            fx.ledger.state().balances,
            TokenBalances::new(101_500_000, 98_500_000)
        );
    }

    #[tokio::test]
    async fn test_swap_sells_excess_token_a() {
        let (fx, engine) = fixture(even_price_ledger(110_000_000, 90_000_000));

        let swap = engine.rebalance().await.unwrap().unwrap();

        assert!(swap.a_to_b);
        assert_eq!(swap.amount_in, 10_000_000);
        assert_eq!(swap.min_amount_out, 9_950_000);
        assert_eq!(fx.ledger.state().swaps, vec![swap]);
    }

    #[tokio::test]
    async fn test_swap_sells_excess_token_b() {
        let (_fx, engine) = fixture(even_price_ledger(90_000_000, 110_000_000));

        let swap = engine.rebalance().await.unwrap().unwrap();

        assert!(!swap.a_to_b);
        assert_eq!(swap.amount_in, 10_000_000);
    }

    #[tokio::test]
    async fn test_range_centered_on_current_tick() {
        let (_fx, engine) = fixture(even_price_ledger(100_000_000, 100_000_000));

        let (_, range) = engine.range().await.unwrap();
        assert_eq!(range, TickRange::new(-2000, 2000));
    }

    #[tokio::test]
    async fn test_range_uses_post_swap_tick() {
        // Tick 500 with equal raw balances values A higher, so a swap runs
        // and moves the pool to tick 1230.
        let (fx, engine) = fixture(MockLedger::new());
        fx.ledger.state().post_swap_tick = Some(1230);

        let outcome = engine.execute(None).await.unwrap();

        assert!(outcome.swap.is_some());
        assert_eq!(outcome.range, TickRange::new(-770, 3230));
        let state = fx.ledger.state();
        assert_eq!(state.mints[0].range, TickRange::new(-770, 3230));
        assert_eq!(state.positions[&outcome.position].tick_lower, -770);
    }

    #[tokio::test]
    async fn test_mint_caps_deposits_at_required_plus_slippage() {
        // Symmetric range at price 1 needs equal amounts, so A binds and
        // most of B stays in the wallet.
        let (fx, engine) = fixture(even_price_ledger(100_000_000, 300_000_000));

        engine
            .mint(&snapshot_at(0), TickRange::new(-2000, 2000))
            .await
            .unwrap();

        let mint = fx.ledger.state().mints[0];
        assert_eq!(mint.amount_a_max, 100_000_000);
        assert!(mint.amount_b_max > 100_000_000 && mint.amount_b_max < 101_000_000);
        assert!(mint.amount_b_min < mint.amount_b_max);
        assert!(mint.amount_b_min > 99_000_000);
    }

    #[tokio::test]
    async fn test_full_rebalance_replaces_position() {
        let old = id("OldPosition");
        let (fx, engine) = fixture(MockLedger::new().with_position(&old, 100, 200));
        fx.ctx.store.save(Some(&old)).unwrap();

        let outcome = engine.execute(Some(&old)).await.unwrap();

        assert_eq!(outcome.exited, Some(old.clone()));
        assert_ne!(outcome.position, old);
        assert_eq!(outcome.range, TickRange::new(-1500, 2500));
        assert!(outcome.liquidity > 0);
        assert_eq!(fx.ctx.store.load().position_id, Some(outcome.position.clone()));

        let state = fx.ledger.state();
        assert_eq!(
            state.submitted,
            vec![SubmissionKind::Exit, SubmissionKind::Swap, SubmissionKind::Mint]
        );
        assert!(!state.positions.contains_key(&old));
        let mint = state.mints[0];
        assert!(mint.amount_a_min <= mint.amount_a_max);
        assert!(mint.amount_b_min <= mint.amount_b_max);
    }

    #[tokio::test]
    async fn test_sequential_exit_reports_partial_progress() {
        let old = id("OldPosition");
        let (fx, engine) = fixture(MockLedger::new().with_position(&old, 100, 200));
        fx.ctx.store.save(Some(&old)).unwrap();
        {
            let mut state = fx.ledger.state();
            state.batched = false;
            state.fail_submit = Some((
                SubmissionKind::Collect,
                LedgerError::Rejected {
                    signature: "sig".into(),
                    reason: "custom program error".into(),
                },
            ));
        }

        let err = engine.execute(Some(&old)).await.unwrap_err();

        match &err {
            KeeperError::PartialExit {
                completed, failed, ..
            } => {
                assert_eq!(completed, &vec![SubmissionKind::Withdraw]);
                assert_eq!(*failed, SubmissionKind::Collect);
            }
            other => panic!("expected partial exit, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Transient);
        // Record untouched, no later phase ran.
        assert_eq!(fx.ctx.store.load().position_id, Some(old));
        assert_eq!(fx.ledger.state().submitted, vec![SubmissionKind::Withdraw]);
    }

    #[tokio::test]
    async fn test_mint_without_event_is_invariant_violation() {
        let (fx, engine) = fixture(MockLedger::new());
        fx.ledger.state().mint_events = 0;

        let err = engine.execute(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolInvariantViolation);
        assert_eq!(fx.ctx.store.load().position_id, None);
        assert_eq!(fx.notifier.subjects(), vec!["Mint needs manual recovery"]);
        // Never retried.
        assert_eq!(
            fx.ledger
                .state()
                .submitted
                .iter()
                .filter(|k| **k == SubmissionKind::Mint)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_mint_with_two_events_is_invariant_violation() {
        let (fx, engine) = fixture(MockLedger::new());
        fx.ledger.state().mint_events = 2;

        let err = engine.execute(None).await.unwrap_err();
        assert!(matches!(err, KeeperError::ProtocolInvariantViolation(_)));
        assert_eq!(fx.ctx.store.load().position_id, None);
    }

    #[tokio::test]
    async fn test_empty_wallet_has_nothing_to_deposit() {
        let (fx, engine) = fixture(even_price_ledger(0, 0));

        let err = engine.execute(None).await.unwrap_err();

        assert!(matches!(
            err,
            KeeperError::NothingToDeposit {
                amount_a: 0,
                amount_b: 0
            }
        ));
        assert_eq!(fx.ledger.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_timeout_leaves_record_empty() {
        let (fx, engine) = fixture(MockLedger::new());
        fx.ledger.state().settle_delay = Some(std::time::Duration::from_secs(60));

        let err = engine.execute(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(fx.ctx.store.load().position_id, None);
    }
}
