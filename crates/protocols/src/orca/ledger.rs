//! Whirlpool implementation of the ledger ports.

use super::executor::{PoolAccounts, TOKEN_PROGRAM_ID, WHIRLPOOL_PROGRAM_ID, WhirlpoolExecutor};
use super::whirlpool::{
    PositionAccount, Whirlpool, parse_mint_decimals, parse_token_account, swap_tick_array_starts,
    tick_array_start_index,
};
use crate::ledger::{
    ExitPlan, LedgerError, LedgerEvent, LedgerReader, LedgerWriter, MintOrder, PendingSubmission,
    SubmissionKind, SubmissionReceipt, SwapOrder,
};
use crate::rpc::RpcProvider;
use async_trait::async_trait;
use clmm_keeper_domain::entities::{PoolSnapshot, PositionId, RangePosition, TokenBalances};
use clmm_keeper_domain::math::concentrated_liquidity::estimate_swap_output;
use clmm_keeper_domain::math::price_tick::{sqrt_price_from_x64, ui_price_from_sqrt};
use clmm_keeper_domain::math::tick_range::TickRange;
use clmm_keeper_domain::value_objects::Percentage;
use rust_decimal::Decimal;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Whirlpool fee rates are expressed in millionths.
const FEE_RATE_DENOMINATOR: u64 = 1_000_000;

/// Configuration of a [`WhirlpoolLedger`].
#[derive(Debug, Clone)]
pub struct WhirlpoolLedgerConfig {
    /// Pool the keeper provides liquidity to.
    pub whirlpool: Pubkey,
    pub program_id: Pubkey,
    /// Interval between signature status polls while awaiting settlement.
    pub settlement_poll: Duration,
}

impl WhirlpoolLedgerConfig {
    pub fn new(whirlpool: Pubkey) -> Self {
        Self {
            whirlpool,
            program_id: WHIRLPOOL_PROGRAM_ID,
            settlement_poll: Duration::from_secs(2),
        }
    }
}

/// Reads and writes one Whirlpool on behalf of one wallet.
pub struct WhirlpoolLedger {
    provider: Arc<RpcProvider>,
    wallet: Arc<Keypair>,
    executor: WhirlpoolExecutor,
    config: WhirlpoolLedgerConfig,
    decimals: OnceCell<(u8, u8)>,
}

impl WhirlpoolLedger {
    pub fn new(
        provider: Arc<RpcProvider>,
        wallet: Arc<Keypair>,
        config: WhirlpoolLedgerConfig,
    ) -> Self {
        let executor = WhirlpoolExecutor::with_program(config.program_id, wallet.pubkey());
        Self {
            provider,
            wallet,
            executor,
            config,
            decimals: OnceCell::new(),
        }
    }

    /// Address of the wallet that owns positions.
    pub fn owner(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    async fn read_pool(&self) -> Result<(Whirlpool, PoolAccounts), LedgerError> {
        let account = self
            .provider
            .get_account(&self.config.whirlpool)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("whirlpool {}", self.config.whirlpool)))?;
        let pool = Whirlpool::parse(&account.data)?;
        let accounts = PoolAccounts {
            whirlpool: self.config.whirlpool,
            mint_a: pool.mint_a(),
            mint_b: pool.mint_b(),
            vault_a: pool.vault_a(),
            vault_b: pool.vault_b(),
            tick_spacing: i32::from(pool.tick_spacing),
        };
        Ok((pool, accounts))
    }

    async fn mint_decimals(&self, accounts: &PoolAccounts) -> Result<(u8, u8), LedgerError> {
        self.decimals
            .get_or_try_init(|| async {
                let mints = self
                    .provider
                    .get_multiple_accounts(&[accounts.mint_a, accounts.mint_b])
                    .await?;
                let decimals_of = |index: usize| -> Result<u8, LedgerError> {
                    let account = mints
                        .get(index)
                        .and_then(Option::as_ref)
                        .ok_or_else(|| LedgerError::NotFound("pool token mint".to_string()))?;
                    parse_mint_decimals(&account.data)
                };
                Ok((decimals_of(0)?, decimals_of(1)?))
            })
            .await
            .copied()
    }

    async fn read_position(&self, position_mint: &Pubkey) -> Result<PositionAccount, LedgerError> {
        let address = self.executor.position(position_mint);
        let account = self
            .provider
            .get_account(&address)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("position {position_mint}")))?;
        if account.owner != self.config.program_id {
            return Err(LedgerError::NotFound(format!("position {position_mint}")));
        }
        PositionAccount::parse(&account.data)
    }

    /// Tick arrays for a swap, replacing uninitialized trailing arrays with
    /// the last initialized one.
    async fn swap_tick_arrays(
        &self,
        pool: &Whirlpool,
        accounts: &PoolAccounts,
        a_to_b: bool,
    ) -> Result<[Pubkey; 3], LedgerError> {
        let starts = swap_tick_array_starts(pool.tick_current_index, accounts.tick_spacing, a_to_b);
        let addresses = starts.map(|start| self.executor.tick_array(&accounts.whirlpool, start));
        let existing = self.provider.get_multiple_accounts(&addresses).await?;

        if existing.first().and_then(Option::as_ref).is_none() {
            return Err(LedgerError::NotSubmitted(format!(
                "tick array {} is not initialized",
                starts[0]
            )));
        }

        let mut arrays = addresses;
        for index in 1..arrays.len() {
            if existing.get(index).and_then(Option::as_ref).is_none() {
                arrays[index] = arrays[index - 1];
            }
        }
        Ok(arrays)
    }

    /// Initialization instructions for the range's tick arrays that do not
    /// exist yet.
    async fn missing_tick_arrays(
        &self,
        accounts: &PoolAccounts,
        lower: i32,
        upper: i32,
    ) -> Result<Vec<Instruction>, LedgerError> {
        let mut starts = vec![tick_array_start_index(lower, accounts.tick_spacing)];
        let upper_start = tick_array_start_index(upper, accounts.tick_spacing);
        if upper_start != starts[0] {
            starts.push(upper_start);
        }

        let addresses: Vec<Pubkey> = starts
            .iter()
            .map(|start| self.executor.tick_array(&accounts.whirlpool, *start))
            .collect();
        let existing = self.provider.get_multiple_accounts(&addresses).await?;

        Ok(starts
            .iter()
            .zip(existing)
            .filter(|(_, account)| account.is_none())
            .map(|(start, _)| {
                debug!(start_index = start, "Initializing tick array");
                self.executor.initialize_tick_array(&accounts.whirlpool, *start)
            })
            .collect())
    }

    async fn send(
        &self,
        kind: SubmissionKind,
        instructions: &[Instruction],
        extra_signer: Option<&Keypair>,
        subject: Option<PositionId>,
    ) -> Result<PendingSubmission, LedgerError> {
        let payer = self.wallet.pubkey();
        let mut signers: Vec<&Keypair> = vec![self.wallet.as_ref()];
        signers.extend(extra_signer);

        let signature = self
            .provider
            .send_instructions(instructions, &payer, &signers)
            .await?;

        info!(kind = %kind, signature = %signature, "Transaction submitted");

        Ok(PendingSubmission {
            kind,
            handle: signature.to_string(),
            subject,
        })
    }
}

fn position_mint(id: &PositionId) -> Result<Pubkey, LedgerError> {
    Pubkey::from_str(id.as_str()).map_err(|e| LedgerError::Decode(format!("position id {id}: {e}")))
}

#[async_trait]
impl LedgerReader for WhirlpoolLedger {
    async fn pool_snapshot(&self) -> Result<PoolSnapshot, LedgerError> {
        let (pool, accounts) = self.read_pool().await?;
        let (decimals_a, decimals_b) = self.mint_decimals(&accounts).await?;

        let sqrt_price = sqrt_price_from_x64(pool.sqrt_price)?;
        let current_price = ui_price_from_sqrt(sqrt_price, decimals_a, decimals_b)?;

        Ok(PoolSnapshot {
            current_price,
            current_tick: pool.tick_current_index,
            total_liquidity: pool.liquidity,
            tick_spacing: accounts.tick_spacing,
            sqrt_price,
            decimals_a,
            decimals_b,
            fee_rate: Percentage(
                Decimal::from(pool.fee_rate) / Decimal::from(FEE_RATE_DENOMINATOR),
            ),
        })
    }

    async fn position(&self, id: &PositionId) -> Result<RangePosition, LedgerError> {
        let position = self.read_position(&position_mint(id)?).await?;
        if position.whirlpool() != self.config.whirlpool {
            warn!(position = %id, pool = %position.whirlpool(), "Position belongs to another pool");
            return Err(LedgerError::NotFound(format!("position {id} in pool")));
        }

        Ok(RangePosition {
            tick_lower: position.tick_lower_index,
            tick_upper: position.tick_upper_index,
            liquidity: position.liquidity,
            owed_amount_a: position.fee_owed_a,
            owed_amount_b: position.fee_owed_b,
        })
    }

    async fn owned_positions(&self, owner: &str) -> Result<Vec<PositionId>, LedgerError> {
        let owner = Pubkey::from_str(owner)
            .map_err(|e| LedgerError::Decode(format!("owner {owner}: {e}")))?;

        let token_accounts = self
            .provider
            .token_accounts_by_owner(&owner, &TOKEN_PROGRAM_ID)
            .await?;
        let token_data = self.provider.get_multiple_accounts(&token_accounts).await?;

        let mut mints = Vec::new();
        for account in token_data.into_iter().flatten() {
            match parse_token_account(&account.data) {
                Ok((mint, 1)) => mints.push(mint),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Skipping unreadable token account"),
            }
        }

        let addresses: Vec<Pubkey> = mints
            .iter()
            .map(|mint| self.executor.position(mint))
            .collect();
        let positions = self.provider.get_multiple_accounts(&addresses).await?;

        let mut owned = Vec::new();
        for (mint, account) in mints.iter().zip(positions) {
            let Some(account) = account else { continue };
            if account.owner != self.config.program_id {
                continue;
            }
            match PositionAccount::parse(&account.data) {
                Ok(position) if position.whirlpool() == self.config.whirlpool => {
                    owned.push(PositionId::new(mint.to_string())?);
                }
                Ok(_) => {}
                Err(e) => debug!(mint = %mint, error = %e, "Skipping unreadable position"),
            }
        }

        debug!(owner = %owner, count = owned.len(), "Enumerated owned positions");
        Ok(owned)
    }

    async fn balances(&self) -> Result<TokenBalances, LedgerError> {
        let (_, accounts) = self.read_pool().await?;
        let atas = [
            self.executor.owner_token_account(&accounts.mint_a),
            self.executor.owner_token_account(&accounts.mint_b),
        ];
        let data = self.provider.get_multiple_accounts(&atas).await?;

        let amount_of = |index: usize| -> Result<u64, LedgerError> {
            match data.get(index).and_then(Option::as_ref) {
                Some(account) => Ok(parse_token_account(&account.data)?.1),
                None => Ok(0),
            }
        };
        Ok(TokenBalances::new(amount_of(0)?, amount_of(1)?))
    }

    async fn quote_swap(&self, a_to_b: bool, amount_in: u64) -> Result<u64, LedgerError> {
        let snapshot = self.pool_snapshot().await?;
        Ok(estimate_swap_output(
            snapshot.total_liquidity,
            snapshot.sqrt_price,
            amount_in,
            a_to_b,
            snapshot.fee_rate,
        )?)
    }
}

#[async_trait]
impl LedgerWriter for WhirlpoolLedger {
    fn supports_batched_exit(&self) -> bool {
        true
    }

    async fn submit_exit(&self, plan: &ExitPlan) -> Result<PendingSubmission, LedgerError> {
        let mint = position_mint(&plan.position)?;
        let position = self.read_position(&mint).await?;
        let (_, accounts) = self.read_pool().await?;
        let range = TickRange::new(position.tick_lower_index, position.tick_upper_index);

        let mut instructions = Vec::with_capacity(3);
        if plan.liquidity > 0 {
            instructions.push(self.executor.decrease_liquidity(
                &accounts,
                &mint,
                range,
                plan.liquidity,
                plan.min_amount_a,
                plan.min_amount_b,
            ));
        }
        instructions.push(self.executor.collect_fees(&accounts, &mint));
        instructions.push(self.executor.close_position(&mint));

        info!(position = %plan.position, liquidity = plan.liquidity, "Submitting batched exit");
        self.send(SubmissionKind::Exit, &instructions, None, Some(plan.position.clone()))
            .await
    }

    async fn submit_withdraw(
        &self,
        position: &PositionId,
        liquidity: u128,
        min_amount_a: u64,
        min_amount_b: u64,
    ) -> Result<PendingSubmission, LedgerError> {
        let mint = position_mint(position)?;
        let account = self.read_position(&mint).await?;
        let (_, accounts) = self.read_pool().await?;
        let range = TickRange::new(account.tick_lower_index, account.tick_upper_index);

        let ix = self.executor.decrease_liquidity(
            &accounts,
            &mint,
            range,
            liquidity,
            min_amount_a,
            min_amount_b,
        );
        self.send(SubmissionKind::Withdraw, &[ix], None, Some(position.clone()))
            .await
    }

    async fn submit_collect(
        &self,
        position: &PositionId,
    ) -> Result<PendingSubmission, LedgerError> {
        let mint = position_mint(position)?;
        let (_, accounts) = self.read_pool().await?;
        let ix = self.executor.collect_fees(&accounts, &mint);
        self.send(SubmissionKind::Collect, &[ix], None, Some(position.clone()))
            .await
    }

    async fn submit_burn(&self, position: &PositionId) -> Result<PendingSubmission, LedgerError> {
        let mint = position_mint(position)?;
        let ix = self.executor.close_position(&mint);
        self.send(SubmissionKind::Burn, &[ix], None, Some(position.clone()))
            .await
    }

    async fn submit_swap(&self, order: &SwapOrder) -> Result<PendingSubmission, LedgerError> {
        let (pool, accounts) = self.read_pool().await?;
        let tick_arrays = self.swap_tick_arrays(&pool, &accounts, order.a_to_b).await?;
        let ix = self.executor.swap(&accounts, tick_arrays, order);

        info!(
            a_to_b = order.a_to_b,
            amount_in = order.amount_in,
            min_amount_out = order.min_amount_out,
            "Submitting swap"
        );
        self.send(SubmissionKind::Swap, &[ix], None, None).await
    }

    async fn submit_mint(&self, order: &MintOrder) -> Result<PendingSubmission, LedgerError> {
        let (_, accounts) = self.read_pool().await?;
        let position_mint = Keypair::new();
        let mint_address = position_mint.pubkey();

        let mut instructions = self
            .missing_tick_arrays(&accounts, order.range.lower, order.range.upper)
            .await?;
        instructions.push(self.executor.open_position(&accounts, &mint_address, order.range));
        instructions.push(self.executor.increase_liquidity(
            &accounts,
            &mint_address,
            order.range,
            order.liquidity,
            order.amount_a_max,
            order.amount_b_max,
        ));

        info!(
            range = %order.range,
            liquidity = order.liquidity,
            amount_a_min = order.amount_a_min,
            amount_a_max = order.amount_a_max,
            amount_b_min = order.amount_b_min,
            amount_b_max = order.amount_b_max,
            position_mint = %mint_address,
            "Submitting mint"
        );
        self.send(
            SubmissionKind::Mint,
            &instructions,
            Some(&position_mint),
            Some(PositionId::new(mint_address.to_string())?),
        )
        .await
    }

    async fn await_settlement(
        &self,
        pending: &PendingSubmission,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let signature = Signature::from_str(&pending.handle)
            .map_err(|e| LedgerError::Decode(format!("signature {}: {e}", pending.handle)))?;

        loop {
            match self.provider.signature_status(&signature).await? {
                None => tokio::time::sleep(self.config.settlement_poll).await,
                Some(Ok(())) => break,
                Some(Err(reason)) => {
                    return Err(LedgerError::Rejected {
                        signature: pending.handle.clone(),
                        reason,
                    });
                }
            }
        }

        let mut events = Vec::new();
        if let (SubmissionKind::Mint, Some(position)) = (pending.kind, &pending.subject) {
            match self.read_position(&position_mint(position)?).await {
                Ok(_) => events.push(LedgerEvent::PositionOpened {
                    position: position.clone(),
                }),
                Err(LedgerError::NotFound(_)) => {
                    warn!(position = %position, "Mint settled without a position account");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(kind = %pending.kind, signature = %signature, "Submission settled");
        Ok(SubmissionReceipt {
            handle: pending.handle.clone(),
            events,
        })
    }
}
