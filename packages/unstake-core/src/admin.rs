//! Pool creation, fee administration and stake account maintenance.

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fee::Fee;
use crate::flash_loan::FlashLoanFee;
use crate::ledger::PoolContext;
use crate::lifecycle::{ensure_deactivatable, ensure_reclaimable, Clock};
use crate::pda::derive_pool_sol_reserves;
use crate::pool::{reclaim, Pool, PoolState};
use crate::protocol_fee::ProtocolFee;
use crate::transfer::Transfer;

// ─── Pool creation ────────────────────────────────────────────────────────────

/// Accounts chosen by the creator of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatePoolParams {
    pub program_id:    Pubkey,
    pub pool:          Pubkey,
    pub fee_authority: Pubkey,
    pub lp_mint:       Pubkey,
    pub fee:           Fee,
}

/// A fresh pool with no liquidity, no stake and flash loans disabled.
pub fn create_pool(params: &CreatePoolParams, protocol_fee: ProtocolFee, clock: Clock) -> Result<PoolContext> {
    params.fee.validate()?;
    let reserves = derive_pool_sol_reserves(&params.pool, &params.program_id).0;

    info!(pool = %params.pool, %reserves, lp_mint = %params.lp_mint, "create_pool");

    Ok(PoolContext {
        program_id: params.program_id,
        state: PoolState {
            address:         params.pool,
            pool:            Pool {
                fee_authority:  params.fee_authority,
                lp_mint:        params.lp_mint,
                incoming_stake: 0,
            },
            reserves,
            liquid_reserves: 0,
            lp_supply:       0,
            flash_loaned:    0,
        },
        fee: params.fee,
        protocol_fee,
        flash_loan_fee: None,
        flash_loan: None,
        clock,
        positions: Vec::new(),
    })
}

// ─── Fee authority ────────────────────────────────────────────────────────────

fn check_fee_authority(ctx: &PoolContext, signer: &Pubkey) -> Result<()> {
    let expected = ctx.state.pool.fee_authority;
    if *signer == expected {
        Ok(())
    } else {
        Err(Error::InvalidFeeAuthority { expected, got: *signer })
    }
}

/// Replace the pool's unstake fee.
pub fn set_fee(ctx: &PoolContext, signer: &Pubkey, fee: Fee) -> Result<PoolContext> {
    check_fee_authority(ctx, signer)?;
    fee.validate()?;
    info!(pool = %ctx.state.address, ?fee, "set_fee");
    Ok(PoolContext { fee, ..ctx.clone() })
}

pub fn set_fee_authority(ctx: &PoolContext, signer: &Pubkey, new_authority: Pubkey) -> Result<PoolContext> {
    check_fee_authority(ctx, signer)?;
    let mut next = ctx.clone();
    next.state.pool.fee_authority = new_authority;
    info!(pool = %ctx.state.address, %new_authority, "set_fee_authority");
    Ok(next)
}

/// Set the flash loan fee, enabling flash loans if they were off.
pub fn set_flash_loan_fee(ctx: &PoolContext, signer: &Pubkey, fee: FlashLoanFee) -> Result<PoolContext> {
    check_fee_authority(ctx, signer)?;
    fee.validate()?;
    info!(pool = %ctx.state.address, fee_ratio = %fee.fee_ratio, "set_flash_loan_fee");
    Ok(PoolContext { flash_loan_fee: Some(fee), ..ctx.clone() })
}

// ─── Protocol fee ─────────────────────────────────────────────────────────────

/// Replace the global protocol fee. Only its current authority may.
pub fn set_protocol_fee(current: &ProtocolFee, signer: &Pubkey, new: ProtocolFee) -> Result<ProtocolFee> {
    if *signer != current.authority {
        return Err(Error::InvalidProtocolFeeAuthority { expected: current.authority, got: *signer });
    }
    new.validate()?;
    info!(
        destination = %new.destination,
        authority = %new.authority,
        fee_ratio = %new.fee_ratio,
        referrer_fee_ratio = %new.referrer_fee_ratio,
        "set_protocol_fee"
    );
    Ok(new)
}

// ─── Stake maintenance ────────────────────────────────────────────────────────

fn held_position(ctx: &PoolContext, stake: &Pubkey) -> Result<usize> {
    ctx.position_index(stake).ok_or(Error::PositionNotOwnedByPool {
        stake:    *stake,
        reserves: ctx.state.reserves,
    })
}

/// Start deactivating a pool-held stake account so it can later be reclaimed.
pub fn deactivate_stake_account(ctx: &PoolContext, stake: &Pubkey) -> Result<(PoolContext, Vec<Transfer>)> {
    let idx = held_position(ctx, stake)?;
    ensure_deactivatable(&ctx.positions[idx].stake, &ctx.state.reserves, &ctx.clock)?;

    let mut next = ctx.clone();
    if let Some(d) = next.positions[idx].stake.delegation.as_mut() {
        d.deactivation_epoch = ctx.clock.epoch;
    }

    debug!(pool = %ctx.state.address, %stake, epoch = ctx.clock.epoch, "deactivate_stake_account");

    Ok((next, vec![Transfer::DeactivateStake { stake: *stake }]))
}

/// Withdraw a fully deactivated stake account back into reserves.
pub fn reclaim_stake_account(ctx: &PoolContext, stake: &Pubkey) -> Result<(PoolContext, Vec<Transfer>)> {
    let idx = held_position(ctx, stake)?;
    let held = &ctx.positions[idx];
    ensure_reclaimable(&held.stake, &ctx.state.reserves, &ctx.clock)?;

    let applied = reclaim(&ctx.state, stake, held.stake.lamports, held.record.lamports_at_creation)?;

    let mut next = ctx.clone();
    next.state = applied.state;
    next.positions.remove(idx);
    Ok((next, applied.transfers))
}
