//! In-memory ledger, hedge and notifier used by the unit tests.

use crate::alerts::{AlertError, Notifier};
use crate::context::KeeperContext;
use crate::hedge::{HedgeError, HedgeService};
use crate::retry::{Harness, RetryPolicy};
use crate::state::StateStore;
use async_trait::async_trait;
use clmm_keeper_domain::entities::{PoolSnapshot, PositionId, RangePosition, TokenBalances};
use clmm_keeper_domain::math::price_tick::tick_to_sqrt_price;
use clmm_keeper_domain::value_objects::Percentage;
use clmm_keeper_protocols::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub fn id(raw: &str) -> PositionId {
    PositionId::new(raw).unwrap()
}

pub fn snapshot_at(tick: i32) -> PoolSnapshot {
    let sqrt_price = tick_to_sqrt_price(tick).unwrap();
    PoolSnapshot {
        current_price: sqrt_price * sqrt_price,
        current_tick: tick,
        total_liquidity: 10_000_000_000,
        tick_spacing: 10,
        sqrt_price,
        decimals_a: 6,
        decimals_b: 6,
        fee_rate: Percentage::from_bps(30),
    }
}

pub struct MockState {
    pub snapshot: PoolSnapshot,
    pub positions: HashMap<PositionId, RangePosition>,
    pub owned: Vec<PositionId>,
    pub balances: TokenBalances,
    pub batched: bool,
    pub fail_reads: Option<LedgerError>,
    pub fail_submit: Option<(SubmissionKind, LedgerError)>,
    /// `PositionOpened` events reported per settled mint.
    pub mint_events: usize,
    pub settle_delay: Option<Duration>,
    /// Tick the pool moves to once a swap lands.
    pub post_swap_tick: Option<i32>,
    /// Makes position enumeration panic.
    pub panic_on_enumerate: bool,
    pub submitted: Vec<SubmissionKind>,
    pub swaps: Vec<SwapOrder>,
    pub mints: Vec<MintOrder>,
    next_id: u32,
}

pub struct MockLedger {
    state: Mutex<MockState>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                snapshot: snapshot_at(500),
                positions: HashMap::new(),
                owned: Vec::new(),
                balances: TokenBalances::new(1_000_000_000, 1_000_000_000),
                batched: true,
                fail_reads: None,
                fail_submit: None,
                mint_events: 1,
                settle_delay: None,
                post_swap_tick: None,
                panic_on_enumerate: false,
                submitted: Vec::new(),
                swaps: Vec::new(),
                mints: Vec::new(),
                next_id: 0,
            }),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            hold: Mutex::new(None),
        }
    }

    pub fn with_position(self, position: &PositionId, lower: i32, upper: i32) -> Self {
        {
            let mut state = self.state();
            state.positions.insert(
                position.clone(),
                RangePosition {
                    tick_lower: lower,
                    tick_upper: upper,
                    liquidity: 1_000_000,
                    owed_amount_a: 10,
                    owed_amount_b: 10,
                },
            );
            state.owned.push(position.clone());
        }
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Parks the next `owned_positions` call until `release` is notified.
    /// Returns `(entered, release)`.
    pub fn hold_enumeration(&self) -> (Arc<Notify>, Arc<Notify>) {
        let pair = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        *self.hold.lock().unwrap() = Some(pair.clone());
        pair
    }

    fn read(&self) -> Result<(), LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match &self.state().fail_reads {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn write(&self, kind: SubmissionKind) -> Result<MutexGuard<'_, MockState>, LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some((failing, e)) = &state.fail_submit {
            if *failing == kind {
                return Err(e.clone());
            }
        }
        state.submitted.push(kind);
        Ok(state)
    }

    fn pending(kind: SubmissionKind, subject: Option<&PositionId>, n: usize) -> PendingSubmission {
        PendingSubmission {
            kind,
            handle: format!("sig-{kind}-{n}"),
            subject: subject.cloned(),
        }
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn pool_snapshot(&self) -> Result<PoolSnapshot, LedgerError> {
        self.read()?;
        Ok(self.state().snapshot.clone())
    }

    async fn position(&self, position: &PositionId) -> Result<RangePosition, LedgerError> {
        self.read()?;
        self.state()
            .positions
            .get(position)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("position {position}")))
    }

    async fn owned_positions(&self, _owner: &str) -> Result<Vec<PositionId>, LedgerError> {
        let hold = self.hold.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
        self.read()?;
        let panics = self.state().panic_on_enumerate;
        if panics {
            panic!("enumeration blew up");
        }
        Ok(self.state().owned.clone())
    }

    async fn balances(&self) -> Result<TokenBalances, LedgerError> {
        self.read()?;
        Ok(self.state().balances)
    }

    async fn quote_swap(&self, _a_to_b: bool, amount_in: u64) -> Result<u64, LedgerError> {
        self.read()?;
        Ok(amount_in)
    }
}

#[async_trait]
impl LedgerWriter for MockLedger {
    fn supports_batched_exit(&self) -> bool {
        self.state().batched
    }

    async fn submit_exit(&self, plan: &ExitPlan) -> Result<PendingSubmission, LedgerError> {
        let mut state = self.write(SubmissionKind::Exit)?;
        state.positions.remove(&plan.position);
        state.owned.retain(|p| p != &plan.position);
        Ok(Self::pending(SubmissionKind::Exit, Some(&plan.position), state.submitted.len()))
    }

    async fn submit_withdraw(
        &self,
        position: &PositionId,
        _liquidity: u128,
        _min_amount_a: u64,
        _min_amount_b: u64,
    ) -> Result<PendingSubmission, LedgerError> {
        let mut state = self.write(SubmissionKind::Withdraw)?;
        if let Some(p) = state.positions.get_mut(position) {
            p.liquidity = 0;
        }
        Ok(Self::pending(SubmissionKind::Withdraw, Some(position), state.submitted.len()))
    }

    async fn submit_collect(
        &self,
        position: &PositionId,
    ) -> Result<PendingSubmission, LedgerError> {
        let mut state = self.write(SubmissionKind::Collect)?;
        if let Some(p) = state.positions.get_mut(position) {
            p.owed_amount_a = 0;
            p.owed_amount_b = 0;
        }
        Ok(Self::pending(SubmissionKind::Collect, Some(position), state.submitted.len()))
    }

    async fn submit_burn(&self, position: &PositionId) -> Result<PendingSubmission, LedgerError> {
        let mut state = self.write(SubmissionKind::Burn)?;
        state.positions.remove(position);
        state.owned.retain(|p| p != position);
        Ok(Self::pending(SubmissionKind::Burn, Some(position), state.submitted.len()))
    }

    async fn submit_swap(&self, order: &SwapOrder) -> Result<PendingSubmission, LedgerError> {
        let mut state = self.write(SubmissionKind::Swap)?;
        let balances = &mut state.balances;
        if order.a_to_b {
            balances.amount_a -= order.amount_in;
            balances.amount_b += order.min_amount_out;
        } else {
            balances.amount_b -= order.amount_in;
            balances.amount_a += order.min_amount_out;
        }
        if let Some(tick) = state.post_swap_tick {
            state.snapshot = snapshot_at(tick);
        }
        state.swaps.push(*order);
        Ok(Self::pending(SubmissionKind::Swap, None, state.submitted.len()))
    }

    async fn submit_mint(&self, order: &MintOrder) -> Result<PendingSubmission, LedgerError> {
        let mut state = self.write(SubmissionKind::Mint)?;
        state.next_id += 1;
        let minted = id(&format!("minted-{}", state.next_id));
        state.positions.insert(
            minted.clone(),
            RangePosition {
                tick_lower: order.range.lower,
                tick_upper: order.range.upper,
                liquidity: order.liquidity,
                owed_amount_a: 0,
                owed_amount_b: 0,
            },
        );
        state.owned.push(minted.clone());
        state.balances = TokenBalances::default();
        state.mints.push(*order);
        Ok(Self::pending(SubmissionKind::Mint, Some(&minted), state.submitted.len()))
    }

    async fn await_settlement(
        &self,
        pending: &PendingSubmission,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let (delay, mint_events) = {
            let state = self.state();
            (state.settle_delay, state.mint_events)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let events = match (&pending.kind, &pending.subject) {
            (SubmissionKind::Mint, Some(position)) => {
                vec![LedgerEvent::PositionOpened { position: position.clone() }; mint_events]
            }
            _ => Vec::new(),
        };
        Ok(SubmissionReceipt {
            handle: pending.handle.clone(),
            events,
        })
    }
}

pub struct MockHedge {
    pub healthy: AtomicBool,
    pub checks: AtomicUsize,
    pub adjustments: Mutex<Vec<Decimal>>,
}

impl MockHedge {
    pub fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
            adjustments: Mutex::new(Vec::new()),
        }
    }

    pub fn unhealthy() -> Self {
        let hedge = Self::healthy();
        hedge.healthy.store(false, Ordering::SeqCst);
        hedge
    }
}

#[async_trait]
impl HedgeService for MockHedge {
    async fn check_health(&self, _position: &PositionId) -> Result<bool, HedgeError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn adjust_hedge(
        &self,
        exposure: Decimal,
        _position: &PositionId,
    ) -> Result<(), HedgeError> {
        self.adjustments.lock().unwrap().push(exposure);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        self.alerts
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Test fixture wiring mocks into a [`KeeperContext`] backed by a temp dir.
pub struct Fixture {
    pub ledger: Arc<MockLedger>,
    pub hedge: Arc<MockHedge>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: Arc<KeeperContext>,
    _dir: TempDir,
}

impl Fixture {
    pub fn new(ledger: MockLedger, hedge: MockHedge) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(ledger);
        let hedge = Arc::new(hedge);
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = Arc::new(KeeperContext {
            reader: ledger.clone(),
            writer: ledger.clone(),
            store: StateStore::new(dir.path().join("state.json")),
            notifier: notifier.clone(),
            hedge: hedge.clone(),
            account: "owner".to_string(),
            harness: Harness::new(
                RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(10),
                },
                Duration::from_secs(5),
            ),
        });
        Self {
            ledger,
            hedge,
            notifier,
            ctx,
            _dir: dir,
        }
    }
}
