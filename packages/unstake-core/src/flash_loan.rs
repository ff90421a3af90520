//! Flash loans of pool reserves.
//!
//! `take` lends out liquid reserves and leaves a [`FlashLoanMarker`] behind.
//! The marker is a hot potato: only `repay` consumes it, and an operation that
//! ends with a marker outstanding fails as a whole with `NoRepayFound`.
//!
//! `take` does not trust the caller to repay. It looks ahead through the
//! enclosing operation via [`InstructionIntrospection`] and refuses to lend
//! unless a repay step for the same pool comes later.
//!
//! Repay sends `borrowed + fee - protocol cut` back to reserves and the
//! protocol cut (and referrer slice) to their own accounts, then deletes the
//! marker.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::{Applied, PoolState};
use crate::protocol_fee::{FeeSplit, ProtocolFee};
use crate::rational::Rational;
use crate::transfer::Transfer;

// ─── Accounts ─────────────────────────────────────────────────────────────────

/// Per-pool flash loan fee. Its absence disables flash loans for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanFee {
    pub fee_ratio: Rational,
}

impl FlashLoanFee {
    pub fn validate(&self) -> Result<()> {
        self.fee_ratio.validate_proper("flash_loan_fee.fee_ratio")
    }

    /// `ceil(borrowed × fee_ratio)`.
    pub fn apply(&self, lamports_borrowed: u64) -> Result<u64> {
        self.fee_ratio.ceil_mul(lamports_borrowed)
    }
}

/// Lamports owed back to the pool within the current operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanMarker {
    pub lamports_borrowed: u64,
}

// ─── Introspection ────────────────────────────────────────────────────────────

/// What `take` needs to know about a step of the enclosing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSummary {
    RepayFlashLoan { pool: Pubkey },
    Other,
}

/// Read access to the ordered steps of the operation being executed.
pub trait InstructionIntrospection {
    /// Index of the step currently executing.
    fn current_index(&self) -> usize;

    /// The step at `index`, or `None` past the last step.
    fn step_at(&self, index: usize) -> Option<StepSummary>;

    /// Index of the first repay for `pool` after the current step.
    fn find_repay_after_current(&self, pool: &Pubkey) -> Option<usize> {
        let mut i = self.current_index() + 1;
        while let Some(step) = self.step_at(i) {
            if step == (StepSummary::RepayFlashLoan { pool: *pool }) {
                return Some(i);
            }
            i += 1;
        }
        None
    }
}

/// A fixed list of steps with a cursor.
#[derive(Debug, Clone, Copy)]
pub struct StepList<'a> {
    pub steps:   &'a [StepSummary],
    pub current: usize,
}

impl InstructionIntrospection for StepList<'_> {
    fn current_index(&self) -> usize {
        self.current
    }

    fn step_at(&self, index: usize) -> Option<StepSummary> {
        self.steps.get(index).copied()
    }
}

// ─── Take / repay ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLoanTaken {
    pub state:     PoolState,
    pub marker:    FlashLoanMarker,
    pub transfers: Vec<Transfer>,
}

/// Lend `lamports` out of reserves to `receiver`.
///
/// A second take in the same operation adds to the outstanding marker.
pub fn take_flash_loan(
    state:         &PoolState,
    fee:           Option<&FlashLoanFee>,
    outstanding:   Option<&FlashLoanMarker>,
    lamports:      u64,
    receiver:      &Pubkey,
    introspection: &impl InstructionIntrospection,
) -> Result<FlashLoanTaken> {
    if fee.is_none() {
        return Err(Error::FlashLoansDisabled(state.address));
    }
    if lamports == 0 {
        return Err(Error::ZeroAmount);
    }
    if lamports > state.liquid_reserves {
        return Err(Error::InsufficientReserves { requested: lamports, available: state.liquid_reserves });
    }
    if introspection.find_repay_after_current(&state.address).is_none() {
        return Err(Error::NoRepayFound { lamports });
    }

    let lamports_borrowed = outstanding
        .map_or(0, |m| m.lamports_borrowed)
        .checked_add(lamports)
        .ok_or(Error::MathOverflow)?;

    let mut next = *state;
    next.liquid_reserves -= lamports;
    next.flash_loaned = state.flash_loaned.checked_add(lamports).ok_or(Error::MathOverflow)?;

    debug!(pool = %state.address, lamports, lamports_borrowed, "take_flash_loan");

    Ok(FlashLoanTaken {
        state:     next,
        marker:    FlashLoanMarker { lamports_borrowed },
        transfers: vec![
            Transfer::Lamports { from: state.reserves, to: *receiver, lamports },
            Transfer::WriteFlashLoanMarker { pool: state.address, lamports_borrowed },
        ],
    })
}

/// Accounts paying and receiving at repay time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepayAccounts<'a> {
    pub repayer:                  &'a Pubkey,
    pub protocol_fee_destination: &'a Pubkey,
    pub referrer:                 Option<&'a Pubkey>,
}

/// Breakdown of a settled flash loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanRepaid {
    pub lamports_borrowed: u64,
    pub fee:               u64,
    pub split:             FeeSplit,
}

/// Settle the outstanding marker: principal plus fee, minus the protocol cut, back to reserves.
pub fn repay_flash_loan(
    state:        &PoolState,
    fee:          Option<&FlashLoanFee>,
    protocol_fee: &ProtocolFee,
    outstanding:  Option<&FlashLoanMarker>,
    accounts:     RepayAccounts<'_>,
) -> Result<Applied<FlashLoanRepaid>> {
    let marker = outstanding.ok_or(Error::RepayWithoutLoan)?;
    let fee = fee.ok_or(Error::FlashLoansDisabled(state.address))?;
    protocol_fee.check_destination(accounts.protocol_fee_destination)?;

    let borrowed = marker.lamports_borrowed;
    let fee_lamports = fee.apply(borrowed)?;
    let split = protocol_fee.split(fee_lamports, accounts.referrer.is_some())?;
    let to_reserves = borrowed.checked_add(split.pool_lamports).ok_or(Error::MathOverflow)?;

    let mut next = *state;
    next.liquid_reserves = state.liquid_reserves.checked_add(to_reserves).ok_or(Error::MathOverflow)?;
    next.flash_loaned = state.flash_loaned.checked_sub(borrowed).ok_or(Error::MathOverflow)?;

    debug!(
        pool = %state.address,
        borrowed,
        fee = fee_lamports,
        protocol = split.protocol_lamports,
        referrer = split.referrer_lamports,
        "repay_flash_loan"
    );

    let mut transfers = Vec::with_capacity(4);
    transfers.extend(Transfer::lamports(*accounts.repayer, state.reserves, to_reserves));
    transfers.extend(Transfer::lamports(
        *accounts.repayer,
        *accounts.protocol_fee_destination,
        split.protocol_lamports,
    ));
    if let Some(referrer) = accounts.referrer {
        transfers.extend(Transfer::lamports(*accounts.repayer, *referrer, split.referrer_lamports));
    }
    transfers.push(Transfer::CloseFlashLoanMarker { pool: state.address });

    Ok(Applied {
        state: next,
        value: FlashLoanRepaid { lamports_borrowed: borrowed, fee: fee_lamports, split },
        transfers,
    })
}

/// End-of-operation check: no marker may survive.
pub fn settle(outstanding: Option<&FlashLoanMarker>) -> Result<()> {
    match outstanding {
        Some(m) => Err(Error::NoRepayFound { lamports: m.lamports_borrowed }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::empty_state;

    fn funded(liquid: u64) -> PoolState {
        let mut s = empty_state();
        s.liquid_reserves = liquid;
        s.lp_supply = liquid;
        s
    }

    fn fee(num: u64, denom: u64) -> FlashLoanFee {
        FlashLoanFee { fee_ratio: Rational::ratio_of(num, denom).unwrap() }
    }

    #[test]
    fn take_without_repay_is_refused() {
        let s = funded(5_000_000_000);
        let steps = [StepSummary::Other];
        let cursor = StepList { steps: &steps, current: 0 };
        let err = take_flash_loan(&s, Some(&fee(1, 1000)), None, 1_000_000_000, &Pubkey::new_unique(), &cursor);
        assert_eq!(err, Err(Error::NoRepayFound { lamports: 1_000_000_000 }));
    }

    #[test]
    fn repay_must_follow_and_match_pool() {
        let s = funded(5_000_000_000);
        let receiver = Pubkey::new_unique();

        let before = [StepSummary::RepayFlashLoan { pool: s.address }, StepSummary::Other];
        let cursor = StepList { steps: &before, current: 1 };
        assert!(take_flash_loan(&s, Some(&fee(1, 1000)), None, 1, &receiver, &cursor).is_err());

        let other_pool = [StepSummary::Other, StepSummary::RepayFlashLoan { pool: Pubkey::new_unique() }];
        let cursor = StepList { steps: &other_pool, current: 0 };
        assert!(take_flash_loan(&s, Some(&fee(1, 1000)), None, 1, &receiver, &cursor).is_err());
    }

    #[test]
    fn take_then_repay_keeps_owned_and_collects_fee() {
        let s = funded(5_000_000_000);
        let steps = [StepSummary::Other, StepSummary::Other, StepSummary::RepayFlashLoan { pool: s.address }];
        let cursor = StepList { steps: &steps, current: 0 };
        let flash_fee = fee(1, 1000);
        let receiver = Pubkey::new_unique();

        let taken = take_flash_loan(&s, Some(&flash_fee), None, 1_000_000_000, &receiver, &cursor).unwrap();
        assert_eq!(taken.state.liquid_reserves, 4_000_000_000);
        assert_eq!(taken.state.owned_lamports().unwrap(), s.owned_lamports().unwrap());
        assert_eq!(taken.marker.lamports_borrowed, 1_000_000_000);
        assert!(settle(Some(&taken.marker)).is_err());

        let protocol_fee = ProtocolFee::default();
        let repaid = repay_flash_loan(
            &taken.state,
            Some(&flash_fee),
            &protocol_fee,
            Some(&taken.marker),
            RepayAccounts {
                repayer:                  &receiver,
                protocol_fee_destination: &protocol_fee.destination,
                referrer:                 None,
            },
        )
        .unwrap();

        // fee 1_000_000, protocol 100_000, pool keeps 900_000
        assert_eq!(repaid.value.fee, 1_000_000);
        assert_eq!(repaid.value.split.protocol_lamports, 100_000);
        assert_eq!(repaid.state.liquid_reserves, 5_000_900_000);
        assert_eq!(repaid.state.flash_loaned, 0);
        assert_eq!(repaid.transfers.last(), Some(&Transfer::CloseFlashLoanMarker { pool: s.address }));
    }

    #[test]
    fn second_take_accumulates() {
        let s = funded(10);
        let steps = [StepSummary::Other, StepSummary::Other, StepSummary::RepayFlashLoan { pool: s.address }];
        let receiver = Pubkey::new_unique();
        let flash_fee = fee(0, 1);

        let first = take_flash_loan(&s, Some(&flash_fee), None, 3, &receiver, &StepList { steps: &steps, current: 0 }).unwrap();
        let second = take_flash_loan(
            &first.state,
            Some(&flash_fee),
            Some(&first.marker),
            4,
            &receiver,
            &StepList { steps: &steps, current: 1 },
        )
        .unwrap();
        assert_eq!(second.marker.lamports_borrowed, 7);
        assert_eq!(second.state.liquid_reserves, 3);
        assert_eq!(second.state.flash_loaned, 7);
    }

    #[test]
    fn loans_need_reserves_and_a_fee_account() {
        let s = funded(10);
        let steps = [StepSummary::Other, StepSummary::RepayFlashLoan { pool: s.address }];
        let cursor = StepList { steps: &steps, current: 0 };
        let receiver = Pubkey::new_unique();
        assert_eq!(
            take_flash_loan(&s, Some(&fee(0, 1)), None, 11, &receiver, &cursor),
            Err(Error::InsufficientReserves { requested: 11, available: 10 }),
        );
        assert_eq!(
            take_flash_loan(&s, None, None, 1, &receiver, &cursor),
            Err(Error::FlashLoansDisabled(s.address)),
        );
    }

    #[test]
    fn repay_checks_marker_and_destination() {
        let s = funded(10);
        let pf = ProtocolFee::default();
        let repayer = Pubkey::new_unique();
        let accounts = RepayAccounts {
            repayer:                  &repayer,
            protocol_fee_destination: &pf.destination,
            referrer:                 None,
        };
        assert_eq!(
            repay_flash_loan(&s, Some(&fee(0, 1)), &pf, None, accounts),
            Err(Error::RepayWithoutLoan),
        );

        let wrong = Pubkey::new_unique();
        let marker = FlashLoanMarker { lamports_borrowed: 0 };
        let accounts = RepayAccounts { protocol_fee_destination: &wrong, ..accounts };
        assert!(matches!(
            repay_flash_loan(&s, Some(&fee(0, 1)), &pf, Some(&marker), accounts),
            Err(Error::WrongProtocolFeeDestination { .. })
        ));
    }

    #[test]
    fn referrer_is_paid_directly() {
        let mut s = funded(0);
        s.flash_loaned = 1_000_000;
        let pf = ProtocolFee::default();
        let repayer = Pubkey::new_unique();
        let referrer = Pubkey::new_unique();
        let out = repay_flash_loan(
            &s,
            Some(&fee(1, 100)),
            &pf,
            Some(&FlashLoanMarker { lamports_borrowed: 1_000_000 }),
            RepayAccounts {
                repayer:                  &repayer,
                protocol_fee_destination: &pf.destination,
                referrer:                 Some(&referrer),
            },
        )
        .unwrap();
        // fee 10_000 → protocol cut 1_000 → 500 / 500
        assert!(out.transfers.contains(&Transfer::Lamports { from: repayer, to: referrer, lamports: 500 }));
        assert!(out.transfers.contains(&Transfer::Lamports { from: repayer, to: pf.destination, lamports: 500 }));
        assert_eq!(out.state.liquid_reserves, 1_009_000);
    }
}
