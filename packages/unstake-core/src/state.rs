//! On-chain account deserialization.
//!
//! Byte offsets mirror the Anchor `#[account]` layouts of the unstake program
//! (8-byte discriminator first), the SPL mint layout and bincode `StakeStateV2`.
//! Rationals are stored on chain as two little-endian `u64`s.

use solana_sdk::pubkey::Pubkey;

use crate::error::{Error, Result};
use crate::fee::{Fee, LiquidityLinearParams};
use crate::flash_loan::{FlashLoanFee, FlashLoanMarker};
use crate::lifecycle::{Clock, Delegation, Lockup, PositionRecord, StakePosition};
use crate::pool::Pool;
use crate::protocol_fee::ProtocolFee;
use crate::rational::Rational;

// ─── Pool ─────────────────────────────────────────────────────────────────────

/// Layout: `disc(8) fee_authority(32) lp_mint(32) incoming_stake(8)` = 80 bytes.
pub fn parse_pool(data: &[u8]) -> Result<Pool> {
    check_len(data, 80, "Pool")?;
    Ok(Pool {
        fee_authority:  read_pubkey(data, 8)?,
        lp_mint:        read_pubkey(data, 40)?,
        incoming_stake: read_u64(data, 72)?,
    })
}

// ─── Fee ──────────────────────────────────────────────────────────────────────

/// Layout: `disc(8) tag(1)` then `Flat { ratio }` (tag 0) or
/// `LiquidityLinear { max_liq_remaining, zero_liq_remaining }` (tag 1).
pub fn parse_fee(data: &[u8]) -> Result<Fee> {
    check_len(data, 9, "Fee")?;
    match data[8] {
        0 => {
            check_len(data, 25, "Fee::Flat")?;
            Ok(Fee::Flat { ratio: read_rational(data, 9)? })
        }
        1 => {
            check_len(data, 41, "Fee::LiquidityLinear")?;
            Ok(Fee::LiquidityLinear {
                params: LiquidityLinearParams {
                    max_liq_remaining:  read_rational(data, 9)?,
                    zero_liq_remaining: read_rational(data, 25)?,
                },
            })
        }
        tag => Err(Error::ParseError { offset: 8, reason: format!("unknown fee variant {tag}") }),
    }
}

// ─── Protocol fee ─────────────────────────────────────────────────────────────

/// Layout: `disc(8) destination(32) authority(32) fee_ratio(16) referrer_fee_ratio(16)` = 104 bytes.
pub fn parse_protocol_fee(data: &[u8]) -> Result<ProtocolFee> {
    check_len(data, 104, "ProtocolFee")?;
    Ok(ProtocolFee {
        destination:        read_pubkey(data, 8)?,
        authority:          read_pubkey(data, 40)?,
        fee_ratio:          read_rational(data, 72)?,
        referrer_fee_ratio: read_rational(data, 88)?,
    })
}

// ─── Flash loans ──────────────────────────────────────────────────────────────

/// Layout: `disc(8) fee_ratio(16)` = 24 bytes.
pub fn parse_flash_loan_fee(data: &[u8]) -> Result<FlashLoanFee> {
    check_len(data, 24, "FlashLoanFee")?;
    Ok(FlashLoanFee { fee_ratio: read_rational(data, 8)? })
}

/// The flash account is a bare `u64`, no discriminator.
pub fn parse_flash_account(data: &[u8]) -> Result<FlashLoanMarker> {
    check_len(data, 8, "FlashAccount")?;
    Ok(FlashLoanMarker { lamports_borrowed: read_u64(data, 0)? })
}

// ─── Stake account record ─────────────────────────────────────────────────────

/// Layout: `disc(8) lamports_at_creation(8)` = 16 bytes.
pub fn parse_stake_account_record(data: &[u8]) -> Result<PositionRecord> {
    check_len(data, 16, "StakeAccountRecord")?;
    Ok(PositionRecord { lamports_at_creation: read_u64(data, 8)? })
}

// ─── SPL mint ─────────────────────────────────────────────────────────────────

/// Read `supply` from a packed SPL mint.
///
/// Mint layout: `mint_authority(36) supply(8) decimals(1) …`
pub fn parse_mint_supply(data: &[u8]) -> Result<u64> {
    check_len(data, 44, "Mint")?;
    read_u64(data, 36)
}

// ─── Stake account ────────────────────────────────────────────────────────────

const STAKE_STATE_UNINITIALIZED: u32 = 0;
const STAKE_STATE_INITIALIZED:   u32 = 1;
const STAKE_STATE_STAKE:         u32 = 2;

/// Parse a `StakeStateV2` account.
///
/// ```text
/// tag(4) rent_exempt_reserve(8) staker(32) withdrawer(32)
/// lockup{ unix_timestamp(8) epoch(8) custodian(32) }
/// delegation{ voter(32) stake(8) activation_epoch(8) deactivation_epoch(8) … }
/// ```
pub fn parse_stake_account(address: Pubkey, lamports: u64, data: &[u8]) -> Result<StakePosition> {
    check_len(data, 4, "StakeState")?;
    let tag = read_u32(data, 0)?;
    match tag {
        STAKE_STATE_UNINITIALIZED => Ok(StakePosition {
            address,
            lamports,
            initialized: false,
            staker:      Pubkey::default(),
            withdrawer:  Pubkey::default(),
            lockup:      Lockup::default(),
            delegation:  None,
        }),
        STAKE_STATE_INITIALIZED | STAKE_STATE_STAKE => {
            check_len(data, 124, "StakeState::Initialized")?;
            let delegation = if tag == STAKE_STATE_STAKE {
                check_len(data, 180, "StakeState::Stake")?;
                Some(Delegation {
                    voter:              read_pubkey(data, 124)?,
                    stake:              read_u64(data, 156)?,
                    activation_epoch:   read_u64(data, 164)?,
                    deactivation_epoch: read_u64(data, 172)?,
                })
            } else {
                None
            };
            Ok(StakePosition {
                address,
                lamports,
                initialized: true,
                staker:      read_pubkey(data, 12)?,
                withdrawer:  read_pubkey(data, 44)?,
                lockup:      Lockup {
                    unix_timestamp: read_i64(data, 76)?,
                    epoch:          read_u64(data, 84)?,
                    custodian:      read_pubkey(data, 92)?,
                },
                delegation,
            })
        }
        tag => Err(Error::ParseError { offset: 0, reason: format!("unsupported stake state {tag}") }),
    }
}

/// Offset of the withdraw authority in a stake account, for RPC memcmp filters.
pub const STAKE_WITHDRAWER_OFFSET: usize = 44;

// ─── Clock sysvar ─────────────────────────────────────────────────────────────

/// Layout: `slot(8) epoch_start_timestamp(8) epoch(8) leader_schedule_epoch(8) unix_timestamp(8)`.
pub fn parse_clock_sysvar(data: &[u8]) -> Result<Clock> {
    check_len(data, 40, "Clock sysvar")?;
    Ok(Clock {
        epoch:          read_u64(data, 16)?,
        unix_timestamp: read_i64(data, 32)?,
    })
}

// ─── Byte-slice primitives ────────────────────────────────────────────────────

fn check_len(data: &[u8], expected: usize, what: &str) -> Result<()> {
    if data.len() < expected {
        return Err(Error::ParseError {
            offset: 0,
            reason: format!("{what} account is {} bytes; expected {expected}", data.len()),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(data: &[u8], offset: usize, what: &str) -> Result<[u8; N]> {
    data.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::ParseError { offset, reason: format!("slice too short for {what}") })
}

pub(crate) fn read_pubkey(data: &[u8], offset: usize) -> Result<Pubkey> {
    Ok(Pubkey::from(read_array::<32>(data, offset, "Pubkey (32 bytes)")?))
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(data, offset, "u32")?))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(data, offset, "u64")?))
}

pub(crate) fn read_i64(data: &[u8], offset: usize) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array(data, offset, "i64")?))
}

fn read_rational(data: &[u8], offset: usize) -> Result<Rational> {
    Ok(Rational {
        num:   read_u64(data, offset)?.into(),
        denom: read_u64(data, offset + 8)?.into(),
    })
}
