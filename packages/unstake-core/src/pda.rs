//! Program-derived addresses of the unstake program.
//!
//! Used by [`crate::ledger::PoolContext::load`] and the CLI to find a pool's
//! accounts. Operations themselves name accounts by pool and stake address
//! and leave derivation to the host.

use solana_sdk::pubkey::Pubkey;

// ─── Well-known program IDs ───────────────────────────────────────────────────

/// Mainnet unstake program.
pub const UNSTAKE_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("unpXTU2Ndrc7WWNyEhQWe4udTzSibLPi25SXv2xbCHQ");

pub const STAKE_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("Stake11111111111111111111111111111111111111");

// ─── PDA seeds ────────────────────────────────────────────────────────────────

pub const FEE_SEED_SUFFIX:            &[u8] = b"fee";
pub const PROTOCOL_FEE_SEED:          &[u8] = b"protocol-fee";
pub const FLASH_ACCOUNT_SEED_SUFFIX:  &[u8] = b"flashaccount";
pub const FLASH_LOAN_FEE_SEED_SUFFIX: &[u8] = b"flashloanfee";

// ─── PDA derivation helpers ───────────────────────────────────────────────────

/// SOL reserves of a pool: `[pool]`.
pub fn derive_pool_sol_reserves(pool: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[pool.as_ref()], program_id)
}

/// `[pool, "fee"]`.
pub fn derive_fee(pool: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[pool.as_ref(), FEE_SEED_SUFFIX], program_id)
}

/// Global protocol fee singleton: `["protocol-fee"]`.
pub fn derive_protocol_fee(program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[PROTOCOL_FEE_SEED], program_id)
}

/// Flash loan marker: `[pool, "flashaccount"]`.
pub fn derive_flash_account(pool: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[pool.as_ref(), FLASH_ACCOUNT_SEED_SUFFIX], program_id)
}

/// `[pool, "flashloanfee"]`.
pub fn derive_flash_loan_fee(pool: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[pool.as_ref(), FLASH_LOAN_FEE_SEED_SUFFIX], program_id)
}

/// Record of a stake account the pool took custody of: `[pool, stake]`.
pub fn derive_stake_account_record(pool: &Pubkey, stake: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[pool.as_ref(), stake.as_ref()], program_id)
}
