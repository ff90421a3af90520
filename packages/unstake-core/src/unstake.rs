//! Instant unstake: the pool buys an active stake account for liquid SOL.
//!
//! ```text
//! custody check ─▶ lifecycle check ─▶ liquidity check ─▶ quote ─▶ protocol split ─▶ intake ─▶ payouts
//! ```

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fee::FeeCurveConfig;
use crate::ledger::{OwnedPosition, PoolContext};
use crate::lifecycle::{ensure_redeemable, PositionRecord, StakePosition};
use crate::pool::intake;
use crate::protocol_fee::FeeSplit;
use crate::serde_helpers::{option_pubkey_str, pubkey_str};
use crate::transfer::{StakeAuthority, Transfer};

/// Where the unstaker's SOL goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "address", rename_all = "snake_case")]
pub enum UnstakeDestination {
    #[serde(with = "pubkey_str")]
    System(Pubkey),
    /// A wrapped SOL token account; resynced after the payout.
    #[serde(with = "pubkey_str")]
    WrappedSol(Pubkey),
}

impl UnstakeDestination {
    pub fn address(&self) -> Pubkey {
        match self {
            UnstakeDestination::System(a) | UnstakeDestination::WrappedSol(a) => *a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeRequest {
    pub stake:                    StakePosition,
    /// Current staker and withdrawer of the stake account.
    #[serde(with = "pubkey_str")]
    pub unstaker:                 Pubkey,
    pub destination:              UnstakeDestination,
    #[serde(with = "pubkey_str")]
    pub protocol_fee_destination: Pubkey,
    #[serde(default, with = "option_pubkey_str")]
    pub referrer:                 Option<Pubkey>,
}

/// Full breakdown of an unstake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeQuote {
    pub stake_lamports:       u64,
    pub fee_lamports:         u64,
    pub split:                FeeSplit,
    pub lamports_to_unstaker: u64,
}

/// Price an unstake of `stake_lamports` without checking the stake account itself.
pub fn preview_unstake(
    ctx:            &PoolContext,
    stake_lamports: u64,
    has_referrer:   bool,
    config:         &FeeCurveConfig,
) -> Result<UnstakeQuote> {
    let fee_lamports = ctx.fee.quote(ctx.state.balance()?, stake_lamports, config)?;
    let split = ctx.protocol_fee.split(fee_lamports, has_referrer)?;
    Ok(UnstakeQuote {
        stake_lamports,
        fee_lamports,
        split,
        lamports_to_unstaker: stake_lamports.checked_sub(fee_lamports).ok_or(Error::MathOverflow)?,
    })
}

/// Hand the stake account to the pool and pay the unstaker.
pub fn unstake(
    ctx:    &PoolContext,
    req:    &UnstakeRequest,
    config: &FeeCurveConfig,
) -> Result<(PoolContext, UnstakeQuote, Vec<Transfer>)> {
    ctx.protocol_fee.check_destination(&req.protocol_fee_destination)?;
    if ctx.position(&req.stake.address).is_some() {
        return Err(Error::PositionAlreadyHeld { stake: req.stake.address });
    }
    if !req.stake.is_owned_by(&req.unstaker) {
        return Err(Error::UnstakerNotAuthority { stake: req.stake.address, unstaker: req.unstaker });
    }
    ensure_redeemable(&req.stake, &ctx.clock)?;

    let quote = preview_unstake(ctx, req.stake.lamports, req.referrer.is_some(), config)?;
    let destination = req.destination.address();
    let intaken = intake(&ctx.state, quote.stake_lamports, quote.fee_lamports, &destination)?;

    let mut state = intaken.state;
    state.liquid_reserves = state
        .liquid_reserves
        .checked_sub(quote.split.total_protocol())
        .ok_or(Error::MathOverflow)?;

    let stake = req.stake.address;
    let reserves = ctx.state.reserves;
    let mut transfers = vec![
        Transfer::AuthorizeStake {
            stake,
            authority:     req.unstaker,
            new_authority: reserves,
            role:          StakeAuthority::Staker,
        },
        Transfer::AuthorizeStake {
            stake,
            authority:     req.unstaker,
            new_authority: reserves,
            role:          StakeAuthority::Withdrawer,
        },
    ];
    transfers.extend(intaken.transfers);
    if let UnstakeDestination::WrappedSol(account) = req.destination {
        transfers.push(Transfer::SyncNative { account });
    }
    if let Some(referrer) = req.referrer {
        transfers.extend(Transfer::lamports(reserves, referrer, quote.split.referrer_lamports));
    }
    transfers.extend(Transfer::lamports(
        reserves,
        req.protocol_fee_destination,
        quote.split.protocol_lamports,
    ));
    let record = PositionRecord { lamports_at_creation: quote.stake_lamports };
    transfers.push(Transfer::CreatePositionRecord {
        pool:                 ctx.state.address,
        stake,
        lamports_at_creation: record.lamports_at_creation,
    });

    let mut held = req.stake.clone();
    held.staker = reserves;
    held.withdrawer = reserves;

    let mut next = ctx.clone();
    next.state = state;
    next.positions.push(OwnedPosition { stake: held, record });

    debug!(
        pool = %ctx.state.address,
        %stake,
        stake_lamports = quote.stake_lamports,
        fee = quote.fee_lamports,
        protocol = quote.split.protocol_lamports,
        referrer = quote.split.referrer_lamports,
        to_unstaker = quote.lamports_to_unstaker,
        "unstake"
    );

    Ok((next, quote, transfers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::Fee;
    use crate::lifecycle::tests::active_position;
    use crate::lifecycle::Clock;
    use crate::pool::tests::empty_state;
    use crate::protocol_fee::ProtocolFee;
    use crate::rational::Rational;

    fn context(liquid: u64) -> PoolContext {
        let mut state = empty_state();
        state.liquid_reserves = liquid;
        state.lp_supply = liquid;
        PoolContext {
            program_id: crate::pda::UNSTAKE_PROGRAM_ID,
            state,
            fee: Fee::Flat { ratio: Rational { num: 69, denom: 1000 } },
            protocol_fee: ProtocolFee::default(),
            flash_loan_fee: None,
            flash_loan: None,
            clock: Clock { epoch: 9, unix_timestamp: 1_700_000_000 },
            positions: Vec::new(),
        }
    }

    fn request(ctx: &PoolContext, lamports: u64, referrer: Option<Pubkey>) -> UnstakeRequest {
        let unstaker = Pubkey::new_unique();
        UnstakeRequest {
            stake: active_position(unstaker, lamports),
            unstaker,
            destination: UnstakeDestination::System(unstaker),
            protocol_fee_destination: ctx.protocol_fee.destination,
            referrer,
        }
    }

    #[test]
    fn flat_fee_unstake_end_to_end() {
        let ctx = context(10_000_000_000);
        let req = request(&ctx, 1_000_000_000, None);
        let (next, quote, transfers) = unstake(&ctx, &req, &FeeCurveConfig::default()).unwrap();

        assert_eq!(quote.fee_lamports, 69_000_000);
        assert_eq!(quote.lamports_to_unstaker, 931_000_000);
        assert_eq!(quote.split.protocol_lamports, 6_900_000);
        assert_eq!(quote.split.referrer_lamports, 0);

        assert_eq!(next.state.pool.incoming_stake, 1_000_000_000);
        assert_eq!(next.state.liquid_reserves, 10_000_000_000 - 931_000_000 - 6_900_000);
        assert_eq!(
            next.state.owned_lamports().unwrap(),
            ctx.state.owned_lamports().unwrap() + quote.split.pool_lamports,
        );

        assert!(transfers.contains(&Transfer::Lamports {
            from:     ctx.state.reserves,
            to:       req.unstaker,
            lamports: 931_000_000,
        }));
        assert!(transfers.contains(&Transfer::Lamports {
            from:     ctx.state.reserves,
            to:       ctx.protocol_fee.destination,
            lamports: 6_900_000,
        }));

        let held = next.position(&req.stake.address).unwrap();
        assert_eq!(held.record.lamports_at_creation, 1_000_000_000);
        assert!(held.stake.is_owned_by(&ctx.state.reserves));
    }

    #[test]
    fn referrer_takes_half_the_protocol_cut() {
        let ctx = context(10_000_000_000);
        let referrer = Pubkey::new_unique();
        let req = request(&ctx, 1_000_000_000, Some(referrer));
        let (_, quote, transfers) = unstake(&ctx, &req, &FeeCurveConfig::default()).unwrap();
        assert_eq!(quote.split.referrer_lamports, 3_450_000);
        assert!(transfers.contains(&Transfer::Lamports {
            from:     ctx.state.reserves,
            to:       referrer,
            lamports: 3_450_000,
        }));
    }

    #[test]
    fn held_stake_cannot_be_sold_again() {
        let ctx = context(100_000_000_000);
        let req = request(&ctx, 10_000_000_000, None);
        let (next, _, _) = unstake(&ctx, &req, &FeeCurveConfig::default()).unwrap();
        assert_eq!(
            unstake(&next, &req, &FeeCurveConfig::default()).map(|_| ()),
            Err(Error::PositionAlreadyHeld { stake: req.stake.address }),
        );

        // Once held, its authorities are the reserves, so the pool itself
        // cannot pose as the unstaker either.
        let held = next.position(&req.stake.address).unwrap().stake.clone();
        let mut as_reserves = request(&next, 1, None);
        as_reserves.stake = held;
        as_reserves.unstaker = next.state.reserves;
        assert!(matches!(
            unstake(&next, &as_reserves, &FeeCurveConfig::default()),
            Err(Error::PositionAlreadyHeld { .. })
        ));
        assert_eq!(next.state.pool.incoming_stake, 10_000_000_000);
    }

    #[test]
    fn wsol_destination_is_synced() {
        let ctx = context(10_000_000_000);
        let mut req = request(&ctx, 1_000_000_000, None);
        let wsol = Pubkey::new_unique();
        req.destination = UnstakeDestination::WrappedSol(wsol);
        let (_, _, transfers) = unstake(&ctx, &req, &FeeCurveConfig::default()).unwrap();
        assert!(transfers.contains(&Transfer::SyncNative { account: wsol }));
    }

    #[test]
    fn failures_leave_context_untouched() {
        let ctx = context(500_000_000);
        let req = request(&ctx, 1_000_000_000, None);
        assert_eq!(
            unstake(&ctx, &req, &FeeCurveConfig::default()).map(|_| ()),
            Err(Error::NotEnoughLiquidity { requested: 1_000_000_000, available: 500_000_000 }),
        );

        let mut wrong = request(&ctx, 1, None);
        wrong.protocol_fee_destination = Pubkey::new_unique();
        assert!(matches!(
            unstake(&ctx, &wrong, &FeeCurveConfig::default()),
            Err(Error::WrongProtocolFeeDestination { .. })
        ));

        let mut foreign = request(&ctx, 1, None);
        foreign.stake.withdrawer = Pubkey::new_unique();
        assert_eq!(
            unstake(&ctx, &foreign, &FeeCurveConfig::default()).map(|_| ()),
            Err(Error::UnstakerNotAuthority { stake: foreign.stake.address, unstaker: foreign.unstaker }),
        );

        let mut locked = request(&ctx, 1, None);
        locked.stake.lockup.epoch = 100;
        assert!(matches!(
            unstake(&ctx, &locked, &FeeCurveConfig::default()),
            Err(Error::LockedUp { .. })
        ));
    }
}
