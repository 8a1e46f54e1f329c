//! Whirlpool instruction builders.
//!
//! Provides the instructions the keeper needs on Orca Whirlpools:
//! - Open positions and deposit liquidity
//! - Withdraw liquidity and collect fees
//! - Close positions
//! - Swap through the pool

use super::whirlpool::{
    MAX_SQRT_PRICE_X64, MIN_SQRT_PRICE_X64, associated_token_address, oracle_address,
    position_address, tick_array_address, tick_array_start_index,
};
use crate::ledger::SwapOrder;
use clmm_keeper_domain::math::tick_range::TickRange;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

/// Orca Whirlpool program ID (mainnet).
pub const WHIRLPOOL_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc");

/// Token program ID.
pub const TOKEN_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Associated token program ID.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// System program ID.
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::from_str_const("11111111111111111111111111111111");

const RENT_SYSVAR_ID: Pubkey =
    Pubkey::from_str_const("SysvarRent111111111111111111111111111111111");

const OPEN_POSITION: [u8; 8] = [0x87, 0x80, 0x2f, 0x4d, 0x0f, 0x98, 0xf0, 0x31];
const INCREASE_LIQUIDITY: [u8; 8] = [0x2e, 0x9c, 0xf3, 0x76, 0x0d, 0xcd, 0xfb, 0xb2];
const DECREASE_LIQUIDITY: [u8; 8] = [0xa0, 0x26, 0xd0, 0x6f, 0x68, 0x5b, 0x2c, 0x01];
const COLLECT_FEES: [u8; 8] = [0xa4, 0x98, 0xcf, 0x63, 0x1e, 0xba, 0x13, 0xb6];
const CLOSE_POSITION: [u8; 8] = [0x7b, 0x86, 0x51, 0x00, 0x31, 0x44, 0x62, 0x62];
const SWAP: [u8; 8] = [0xf8, 0xc6, 0x9e, 0x91, 0xe1, 0x75, 0x87, 0xc8];
const INITIALIZE_TICK_ARRAY: [u8; 8] = [0x0b, 0xbc, 0xc1, 0xd6, 0x8d, 0x5b, 0x95, 0xb8];

/// Addresses of a pool the builders need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAccounts {
    pub whirlpool: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub tick_spacing: i32,
}

/// Builds Whirlpool instructions on behalf of one wallet.
#[derive(Debug, Clone)]
pub struct WhirlpoolExecutor {
    program_id: Pubkey,
    owner: Pubkey,
}

impl WhirlpoolExecutor {
    pub fn new(owner: Pubkey) -> Self {
        Self::with_program(WHIRLPOOL_PROGRAM_ID, owner)
    }

    pub fn with_program(program_id: Pubkey, owner: Pubkey) -> Self {
        Self { program_id, owner }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn owner(&self) -> &Pubkey {
        &self.owner
    }

    /// Wallet associated token account for `mint`.
    pub fn owner_token_account(&self, mint: &Pubkey) -> Pubkey {
        associated_token_address(
            &self.owner,
            mint,
            &TOKEN_PROGRAM_ID,
            &ASSOCIATED_TOKEN_PROGRAM_ID,
        )
    }

    pub fn position(&self, position_mint: &Pubkey) -> Pubkey {
        position_address(&self.program_id, position_mint).0
    }

    pub fn tick_array(&self, whirlpool: &Pubkey, start_index: i32) -> Pubkey {
        tick_array_address(&self.program_id, whirlpool, start_index)
    }

    /// Tick arrays holding the bounds of `range`.
    pub fn range_tick_arrays(&self, pool: &PoolAccounts, range: TickRange) -> (Pubkey, Pubkey) {
        (
            self.tick_array(
                &pool.whirlpool,
                tick_array_start_index(range.lower, pool.tick_spacing),
            ),
            self.tick_array(
                &pool.whirlpool,
                tick_array_start_index(range.upper, pool.tick_spacing),
            ),
        )
    }

    pub fn open_position(
        &self,
        pool: &PoolAccounts,
        position_mint: &Pubkey,
        range: TickRange,
    ) -> Instruction {
        let (position, bump) = position_address(&self.program_id, position_mint);

        let mut data = Vec::with_capacity(17);
        data.extend_from_slice(&OPEN_POSITION);
        data.push(bump);
        data.extend_from_slice(&range.lower.to_le_bytes());
        data.extend_from_slice(&range.upper.to_le_bytes());

        let accounts = vec![
            AccountMeta::new(self.owner, true), // funder
            AccountMeta::new_readonly(self.owner, false), // owner
            AccountMeta::new(position, false), // position
            AccountMeta::new(*position_mint, true), // position_mint
            // position_token_account
            AccountMeta::new(self.owner_token_account(position_mint), false),
            AccountMeta::new_readonly(pool.whirlpool, false), // whirlpool
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false), // token_program
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false), // system_program
            AccountMeta::new_readonly(RENT_SYSVAR_ID, false), // rent
            // associated_token_program
            AccountMeta::new_readonly(ASSOCIATED_TOKEN_PROGRAM_ID, false),
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data,
        }
    }

    pub fn increase_liquidity(
        &self,
        pool: &PoolAccounts,
        position_mint: &Pubkey,
        range: TickRange,
        liquidity: u128,
        token_max_a: u64,
        token_max_b: u64,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: self.modify_liquidity_accounts(pool, position_mint, range),
            data: liquidity_data(INCREASE_LIQUIDITY, liquidity, token_max_a, token_max_b),
        }
    }

    pub fn decrease_liquidity(
        &self,
        pool: &PoolAccounts,
        position_mint: &Pubkey,
        range: TickRange,
        liquidity: u128,
        token_min_a: u64,
        token_min_b: u64,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: self.modify_liquidity_accounts(pool, position_mint, range),
            data: liquidity_data(DECREASE_LIQUIDITY, liquidity, token_min_a, token_min_b),
        }
    }

    pub fn collect_fees(&self, pool: &PoolAccounts, position_mint: &Pubkey) -> Instruction {
        let accounts = vec![
            AccountMeta::new_readonly(pool.whirlpool, false), // whirlpool
            AccountMeta::new_readonly(self.owner, true), // position_authority
            AccountMeta::new(self.position(position_mint), false), // position
            // position_token_account
            AccountMeta::new_readonly(self.owner_token_account(position_mint), false),
            // token_owner_account_a
            AccountMeta::new(self.owner_token_account(&pool.mint_a), false),
            AccountMeta::new(pool.vault_a, false), // token_vault_a
            // token_owner_account_b
            AccountMeta::new(self.owner_token_account(&pool.mint_b), false),
            AccountMeta::new(pool.vault_b, false), // token_vault_b
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false), // token_program
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data: COLLECT_FEES.to_vec(),
        }
    }

    pub fn close_position(&self, position_mint: &Pubkey) -> Instruction {
        let accounts = vec![
            AccountMeta::new_readonly(self.owner, true), // position_authority
            AccountMeta::new(self.owner, false), // receiver
            AccountMeta::new(self.position(position_mint), false), // position
            AccountMeta::new(*position_mint, false), // position_mint
            // position_token_account
            AccountMeta::new(self.owner_token_account(position_mint), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false), // token_program
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data: CLOSE_POSITION.to_vec(),
        }
    }

    /// Exact-input swap bounded only by `order.min_amount_out`.
    pub fn swap(
        &self,
        pool: &PoolAccounts,
        tick_arrays: [Pubkey; 3],
        order: &SwapOrder,
    ) -> Instruction {
        let sqrt_price_limit = if order.a_to_b {
            MIN_SQRT_PRICE_X64
        } else {
            MAX_SQRT_PRICE_X64
        };

        let mut data = Vec::with_capacity(42);
        data.extend_from_slice(&SWAP);
        data.extend_from_slice(&order.amount_in.to_le_bytes());
        data.extend_from_slice(&order.min_amount_out.to_le_bytes());
        data.extend_from_slice(&sqrt_price_limit.to_le_bytes());
        data.push(1); // amount_specified_is_input
        data.push(u8::from(order.a_to_b));

        let accounts = vec![
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(self.owner, true),
            AccountMeta::new(pool.whirlpool, false),
            AccountMeta::new(self.owner_token_account(&pool.mint_a), false),
            AccountMeta::new(pool.vault_a, false),
            AccountMeta::new(self.owner_token_account(&pool.mint_b), false),
            AccountMeta::new(pool.vault_b, false),
            AccountMeta::new(tick_arrays[0], false),
            AccountMeta::new(tick_arrays[1], false),
            AccountMeta::new(tick_arrays[2], false),
            AccountMeta::new(oracle_address(&self.program_id, &pool.whirlpool), false),
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data,
        }
    }

    pub fn initialize_tick_array(&self, whirlpool: &Pubkey, start_index: i32) -> Instruction {
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&INITIALIZE_TICK_ARRAY);
        data.extend_from_slice(&start_index.to_le_bytes());

        let accounts = vec![
            AccountMeta::new_readonly(*whirlpool, false),
            AccountMeta::new(self.owner, true),
            AccountMeta::new(self.tick_array(whirlpool, start_index), false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data,
        }
    }

    fn modify_liquidity_accounts(
        &self,
        pool: &PoolAccounts,
        position_mint: &Pubkey,
        range: TickRange,
    ) -> Vec<AccountMeta> {
        let (tick_array_lower, tick_array_upper) = self.range_tick_arrays(pool, range);
        vec![
            AccountMeta::new(pool.whirlpool, false), // whirlpool
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false), // token_program
            AccountMeta::new_readonly(self.owner, true), // position_authority
            AccountMeta::new(self.position(position_mint), false), // position
            // position_token_account
            AccountMeta::new_readonly(self.owner_token_account(position_mint), false),
            // token_owner_account_a
            AccountMeta::new(self.owner_token_account(&pool.mint_a), false),
            // token_owner_account_b
            AccountMeta::new(self.owner_token_account(&pool.mint_b), false),
            AccountMeta::new(pool.vault_a, false), // token_vault_a
            AccountMeta::new(pool.vault_b, false), // token_vault_b
            AccountMeta::new(tick_array_lower, false), // tick_array_lower
            AccountMeta::new(tick_array_upper, false), // tick_array_upper
        ]
    }
}

fn liquidity_data(discriminator: [u8; 8], liquidity: u128, token_a: u64, token_b: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(40);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&liquidity.to_le_bytes());
    data.extend_from_slice(&token_a.to_le_bytes());
    data.extend_from_slice(&token_b.to_le_bytes());
    data
}
