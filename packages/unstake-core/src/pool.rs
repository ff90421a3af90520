//! Pool share accounting.
//!
//! The pool owns `incoming_stake + liquid_reserves + flash_loaned` lamports.
//! LP tokens are claims on that total. Mint and burn amounts round down, so
//! rounding never hands a liquidity provider more than their share.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fee::PoolBalance;
use crate::rational::{wide_to_u64, U512};
use crate::serde_helpers::pubkey_str;
use crate::transfer::Transfer;

// ─── State ────────────────────────────────────────────────────────────────────

/// Persistent pool account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    #[serde(with = "pubkey_str")]
    pub fee_authority:  Pubkey,
    #[serde(with = "pubkey_str")]
    pub lp_mint:        Pubkey,
    /// Lamports at creation of every stake account the pool holds and has not reclaimed.
    pub incoming_stake: u64,
}

/// Everything pool accounting reads, as one explicit snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    #[serde(with = "pubkey_str")]
    pub address:         Pubkey,
    pub pool:            Pool,
    /// SOL reserves account of the pool.
    #[serde(with = "pubkey_str")]
    pub reserves:        Pubkey,
    pub liquid_reserves: u64,
    pub lp_supply:       u64,
    /// Lamports out on flash loan in the current operation.
    #[serde(default)]
    pub flash_loaned:    u64,
}

impl PoolState {
    pub fn owned_lamports(&self) -> Result<u64> {
        self.pool
            .incoming_stake
            .checked_add(self.liquid_reserves)
            .and_then(|v| v.checked_add(self.flash_loaned))
            .ok_or(Error::MathOverflow)
    }

    /// Balances for fee quoting. Lamports out on flash loan are owned but
    /// not liquid, so they price like incoming stake.
    pub fn balance(&self) -> Result<PoolBalance> {
        Ok(PoolBalance {
            incoming_stake:  self
                .pool
                .incoming_stake
                .checked_add(self.flash_loaned)
                .ok_or(Error::MathOverflow)?,
            liquid_reserves: self.liquid_reserves,
        })
    }

    pub fn check_mint(&self, lp_mint: &Pubkey) -> Result<()> {
        if *lp_mint == self.pool.lp_mint {
            Ok(())
        } else {
            Err(Error::WrongMintAccount { expected: self.pool.lp_mint, got: *lp_mint })
        }
    }
}

/// New state, the operation's result and the transfers that realise it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub state:     PoolState,
    pub value:     T,
    pub transfers: Vec<Transfer>,
}

// ─── Share math ───────────────────────────────────────────────────────────────

/// LP tokens minted for `amount` lamports.
///
/// An empty pool (nothing owned or nothing minted) mints
/// `amount + owned - supply`: 1:1 on a fresh pool, and any stray lamports
/// already in reserves go to the first depositor.
pub fn calc_lp_tokens_to_mint(owned: u64, supply: u64, amount: u64) -> Result<u64> {
    let minted = if owned == 0 || supply == 0 {
        amount
            .checked_add(owned)
            .ok_or(Error::MathOverflow)?
            .checked_sub(supply)
            .ok_or(Error::LiquidityToAddTooLittle { amount })?
    } else {
        wide_to_u64(U512::from(amount) * U512::from(supply) / U512::from(owned))?
    };
    if minted == 0 {
        return Err(Error::LiquidityToAddTooLittle { amount });
    }
    Ok(minted)
}

/// Lamports owed for burning `shares`; zero on an empty pool.
pub fn calc_lamports_to_withdraw(owned: u64, supply: u64, shares: u64) -> Result<u64> {
    if owned == 0 || supply == 0 {
        return Ok(0);
    }
    wide_to_u64(U512::from(shares) * U512::from(owned) / U512::from(supply))
}

// ─── Operations ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    #[serde(with = "pubkey_str")]
    pub depositor:        Pubkey,
    #[serde(with = "pubkey_str")]
    pub lp_token_account: Pubkey,
    #[serde(with = "pubkey_str")]
    pub lp_mint:          Pubkey,
    pub lamports:         u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    #[serde(with = "pubkey_str")]
    pub owner:            Pubkey,
    #[serde(with = "pubkey_str")]
    pub lp_token_account: Pubkey,
    #[serde(with = "pubkey_str")]
    pub lp_mint:          Pubkey,
    #[serde(with = "pubkey_str")]
    pub to:               Pubkey,
    pub lp_tokens:        u64,
}

/// Add liquidity. Returns the LP tokens minted.
pub fn deposit(state: &PoolState, req: &DepositRequest) -> Result<Applied<u64>> {
    state.check_mint(&req.lp_mint)?;
    if req.lamports == 0 {
        return Err(Error::ZeroAmount);
    }
    let owned = state.owned_lamports()?;
    let minted = calc_lp_tokens_to_mint(owned, state.lp_supply, req.lamports)?;

    let mut next = *state;
    next.liquid_reserves = state.liquid_reserves.checked_add(req.lamports).ok_or(Error::MathOverflow)?;
    next.lp_supply = state.lp_supply.checked_add(minted).ok_or(Error::MathOverflow)?;

    debug!(
        pool = %state.address,
        lamports = req.lamports,
        minted,
        owned_before = owned,
        "add_liquidity"
    );

    Ok(Applied {
        state: next,
        value: minted,
        transfers: vec![
            Transfer::Lamports { from: req.depositor, to: state.reserves, lamports: req.lamports },
            Transfer::MintLp { mint: state.pool.lp_mint, to: req.lp_token_account, amount: minted },
        ],
    })
}

/// Remove liquidity. Returns the lamports paid out; only liquid reserves can pay.
pub fn withdraw(state: &PoolState, req: &WithdrawRequest) -> Result<Applied<u64>> {
    state.check_mint(&req.lp_mint)?;
    if req.lp_tokens == 0 {
        return Err(Error::ZeroAmount);
    }
    if req.lp_tokens > state.lp_supply {
        return Err(Error::BurnExceedsSupply { shares: req.lp_tokens, supply: state.lp_supply });
    }
    let owned = state.owned_lamports()?;
    let lamports = calc_lamports_to_withdraw(owned, state.lp_supply, req.lp_tokens)?;
    if lamports > state.liquid_reserves {
        return Err(Error::InsufficientReserves { requested: lamports, available: state.liquid_reserves });
    }

    let mut next = *state;
    next.liquid_reserves -= lamports;
    next.lp_supply -= req.lp_tokens;

    debug!(pool = %state.address, burned = req.lp_tokens, lamports, "remove_liquidity");

    let mut transfers = vec![Transfer::BurnLp {
        mint:      state.pool.lp_mint,
        from:      req.lp_token_account,
        authority: req.owner,
        amount:    req.lp_tokens,
    }];
    transfers.extend(Transfer::lamports(state.reserves, req.to, lamports));

    Ok(Applied { state: next, value: lamports, transfers })
}

/// Take custody of a stake account worth `position_lamports`, paying
/// `position_lamports - gross_fee` out of reserves to `to`.
///
/// Owned value grows by `gross_fee`; any protocol or referrer cut is paid
/// out afterwards by the caller.
pub fn intake(state: &PoolState, position_lamports: u64, gross_fee: u64, to: &Pubkey) -> Result<Applied<u64>> {
    let payout = position_lamports.checked_sub(gross_fee).ok_or(Error::MathOverflow)?;
    if payout > state.liquid_reserves {
        return Err(Error::NotEnoughLiquidity { requested: payout, available: state.liquid_reserves });
    }

    let mut next = *state;
    next.pool.incoming_stake = state
        .pool
        .incoming_stake
        .checked_add(position_lamports)
        .ok_or(Error::MathOverflow)?;
    next.liquid_reserves -= payout;

    Ok(Applied {
        state:     next,
        value:     payout,
        transfers: Transfer::lamports(state.reserves, *to, payout).into_iter().collect(),
    })
}

/// Fold a fully liquid stake account back into reserves and retire its record.
///
/// Anything above `record_lamports` (rewards earned while held) is a gain for
/// every LP holder; anything below is a loss.
pub fn reclaim(state: &PoolState, stake: &Pubkey, position_lamports: u64, record_lamports: u64) -> Result<Applied<u64>> {
    let mut next = *state;
    next.pool.incoming_stake = state
        .pool
        .incoming_stake
        .checked_sub(record_lamports)
        .ok_or(Error::MathOverflow)?;
    next.liquid_reserves = state
        .liquid_reserves
        .checked_add(position_lamports)
        .ok_or(Error::MathOverflow)?;

    debug!(
        pool = %state.address,
        stake = %stake,
        lamports = position_lamports,
        lamports_at_creation = record_lamports,
        "reclaim_stake_account"
    );

    Ok(Applied {
        state:     next,
        value:     position_lamports,
        transfers: vec![
            Transfer::WithdrawStake { stake: *stake, to: state.reserves, lamports: position_lamports },
            Transfer::ClosePositionRecord { pool: state.address, stake: *stake },
        ],
    })
}
