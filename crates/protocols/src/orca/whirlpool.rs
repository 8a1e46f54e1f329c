//! Whirlpool account layouts and address derivation.
//!
//! Only the leading fields of each account are decoded. Borsh reads them in
//! declaration order and ignores the trailing reward data.

use crate::ledger::LedgerError;
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

/// Anchor account discriminator of `Whirlpool`.
pub const WHIRLPOOL_DISCRIMINATOR: [u8; 8] = [0x3f, 0x95, 0xd1, 0x0c, 0xe1, 0x80, 0x63, 0x09];
/// Anchor account discriminator of `Position`.
pub const POSITION_DISCRIMINATOR: [u8; 8] = [0xaa, 0xbc, 0x8f, 0xe4, 0x7a, 0x40, 0xf7, 0xd0];

/// Ticks per tick array account.
pub const TICK_ARRAY_SIZE: i32 = 88;

/// Lowest `sqrt_price_limit` accepted by `swap` (Q64.64).
pub const MIN_SQRT_PRICE_X64: u128 = 4_295_048_016;
/// Highest `sqrt_price_limit` accepted by `swap` (Q64.64).
pub const MAX_SQRT_PRICE_X64: u128 = 79_226_673_515_401_279_992_447_579_055;

const TOKEN_ACCOUNT_LEN: usize = 165;
const MINT_DECIMALS_OFFSET: usize = 44;

#[derive(BorshDeserialize, BorshSerialize, Debug, Clone, PartialEq, Eq)]
pub struct Whirlpool {
    pub discriminator: [u8; 8],
    pub whirlpools_config: [u8; 32],
    pub whirlpool_bump: [u8; 1],
    pub tick_spacing: u16,
    pub tick_spacing_seed: [u8; 2],
    /// Hundredths of a basis point: 3000 is 0.3%.
    pub fee_rate: u16,
    pub protocol_fee_rate: u16,
    pub liquidity: u128,
    /// Q64.64 square root of the raw price.
    pub sqrt_price: u128,
    pub tick_current_index: i32,
    pub protocol_fee_owed_a: u64,
    pub protocol_fee_owed_b: u64,
    pub token_mint_a: [u8; 32],
    pub token_vault_a: [u8; 32],
    pub fee_growth_global_a: u128,
    pub token_mint_b: [u8; 32],
    pub token_vault_b: [u8; 32],
    pub fee_growth_global_b: u128,
    pub reward_last_updated_timestamp: u64,
}

impl Whirlpool {
    pub fn parse(data: &[u8]) -> Result<Self, LedgerError> {
        let pool = Self::deserialize(&mut &data[..])
            .map_err(|e| LedgerError::Decode(format!("whirlpool account: {e}")))?;
        if pool.discriminator != WHIRLPOOL_DISCRIMINATOR {
            return Err(LedgerError::Decode("not a whirlpool account".to_string()));
        }
        Ok(pool)
    }

    pub fn mint_a(&self) -> Pubkey {
        Pubkey::new_from_array(self.token_mint_a)
    }

    pub fn mint_b(&self) -> Pubkey {
        Pubkey::new_from_array(self.token_mint_b)
    }

    pub fn vault_a(&self) -> Pubkey {
        Pubkey::new_from_array(self.token_vault_a)
    }

    pub fn vault_b(&self) -> Pubkey {
        Pubkey::new_from_array(self.token_vault_b)
    }
}

#[derive(BorshDeserialize, BorshSerialize, Debug, Clone, PartialEq, Eq)]
pub struct PositionAccount {
    pub discriminator: [u8; 8],
    pub whirlpool: [u8; 32],
    pub position_mint: [u8; 32],
    pub liquidity: u128,
    pub tick_lower_index: i32,
    pub tick_upper_index: i32,
    pub fee_growth_checkpoint_a: u128,
    pub fee_owed_a: u64,
    pub fee_growth_checkpoint_b: u128,
    pub fee_owed_b: u64,
}

impl PositionAccount {
    pub fn parse(data: &[u8]) -> Result<Self, LedgerError> {
        let position = Self::deserialize(&mut &data[..])
            .map_err(|e| LedgerError::Decode(format!("position account: {e}")))?;
        if position.discriminator != POSITION_DISCRIMINATOR {
            return Err(LedgerError::Decode("not a position account".to_string()));
        }
        Ok(position)
    }

    pub fn whirlpool(&self) -> Pubkey {
        Pubkey::new_from_array(self.whirlpool)
    }
}

/// Mint and amount of an SPL token account.
pub fn parse_token_account(data: &[u8]) -> Result<(Pubkey, u64), LedgerError> {
    if data.len() < TOKEN_ACCOUNT_LEN {
        return Err(LedgerError::Decode(format!(
            "token account has {} bytes",
            data.len()
        )));
    }
    let mut mint = [0u8; 32];
    mint.copy_from_slice(&data[0..32]);
    let mut amount = [0u8; 8];
    amount.copy_from_slice(&data[64..72]);
    Ok((Pubkey::new_from_array(mint), u64::from_le_bytes(amount)))
}

/// Decimals of an SPL mint account.
pub fn parse_mint_decimals(data: &[u8]) -> Result<u8, LedgerError> {
    data.get(MINT_DECIMALS_OFFSET)
        .copied()
        .ok_or_else(|| LedgerError::Decode(format!("mint account has {} bytes", data.len())))
}

pub fn position_address(program_id: &Pubkey, position_mint: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[b"position", position_mint.as_ref()], program_id)
}

pub fn oracle_address(program_id: &Pubkey, whirlpool: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"oracle", whirlpool.as_ref()], program_id).0
}

pub fn tick_array_address(program_id: &Pubkey, whirlpool: &Pubkey, start_index: i32) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"tick_array",
            whirlpool.as_ref(),
            start_index.to_string().as_bytes(),
        ],
        program_id,
    )
    .0
}

pub fn associated_token_address(
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
    ata_program: &Pubkey,
) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        ata_program,
    )
    .0
}

/// Start index of the tick array holding `tick`.
pub fn tick_array_start_index(tick: i32, tick_spacing: i32) -> i32 {
    let ticks_per_array = tick_spacing * TICK_ARRAY_SIZE;
    tick.div_euclid(ticks_per_array) * ticks_per_array
}

/// The three tick arrays a swap may traverse, in traversal order.
pub fn swap_tick_array_starts(tick: i32, tick_spacing: i32, a_to_b: bool) -> [i32; 3] {
    let ticks_per_array = tick_spacing * TICK_ARRAY_SIZE;
    if a_to_b {
        let start = tick_array_start_index(tick, tick_spacing);
        [start, start - ticks_per_array, start - 2 * ticks_per_array]
    } else {
        let start = tick_array_start_index(tick + tick_spacing, tick_spacing);
        [start, start + ticks_per_array, start + 2 * ticks_per_array]
    }
}
