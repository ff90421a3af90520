//! Atomic multi-step operations.
//!
//! An [`Operation`] is the core's view of one ledger transaction against a
//! pool: an ordered list of steps that either all apply or none do. Steps run
//! against a working copy of the [`PoolContext`]; the caller's context is only
//! replaced by the returned one, so a failing step leaves nothing behind.
//!
//! The operation doubles as the introspection source for flash loans: a take
//! looks for a later repay step of the same pool, and after the last step any
//! outstanding loan fails the whole operation with `NoRepayFound`.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info_span};

use crate::admin::{deactivate_stake_account, reclaim_stake_account};
use crate::error::Result;
use crate::fee::FeeCurveConfig;
use crate::flash_loan::{
    repay_flash_loan, settle, take_flash_loan, FlashLoanRepaid, InstructionIntrospection,
    RepayAccounts, StepSummary,
};
use crate::ledger::PoolContext;
use crate::pool::{deposit, withdraw, DepositRequest, WithdrawRequest};
use crate::serde_helpers::{option_pubkey_str, pubkey_str};
use crate::transfer::Transfer;
use crate::unstake::{unstake, UnstakeQuote, UnstakeRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum OperationStep {
    Deposit(DepositRequest),
    Withdraw(WithdrawRequest),
    Unstake(UnstakeRequest),
    DeactivateStake {
        #[serde(with = "pubkey_str")]
        stake: Pubkey,
    },
    ReclaimStake {
        #[serde(with = "pubkey_str")]
        stake: Pubkey,
    },
    TakeFlashLoan {
        #[serde(with = "pubkey_str")]
        pool:     Pubkey,
        lamports: u64,
        #[serde(with = "pubkey_str")]
        receiver: Pubkey,
    },
    RepayFlashLoan {
        #[serde(with = "pubkey_str")]
        pool:                     Pubkey,
        #[serde(with = "pubkey_str")]
        repayer:                  Pubkey,
        #[serde(with = "pubkey_str")]
        protocol_fee_destination: Pubkey,
        #[serde(default, with = "option_pubkey_str")]
        referrer:                 Option<Pubkey>,
    },
    /// Caller-supplied effects between core steps, e.g. whatever the
    /// borrower does with a flash loan. Passed through untouched.
    External { transfers: Vec<Transfer> },
}

impl OperationStep {
    fn summary(&self) -> StepSummary {
        match self {
            OperationStep::RepayFlashLoan { pool, .. } => StepSummary::RepayFlashLoan { pool: *pool },
            _ => StepSummary::Other,
        }
    }
}

/// What each step produced, in step order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum StepResult {
    LpMinted(u64),
    LamportsWithdrawn(u64),
    Unstaked(UnstakeQuote),
    Deactivated,
    Reclaimed(u64),
    Borrowed(u64),
    Repaid(FlashLoanRepaid),
    /// A flash loan step addressed to a different pool.
    Skipped,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub context:   PoolContext,
    pub results:   Vec<StepResult>,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub steps: Vec<OperationStep>,
}

struct Cursor<'a> {
    steps: &'a [OperationStep],
    index: usize,
}

impl InstructionIntrospection for Cursor<'_> {
    fn current_index(&self) -> usize {
        self.index
    }

    fn step_at(&self, index: usize) -> Option<StepSummary> {
        self.steps.get(index).map(OperationStep::summary)
    }
}

impl Operation {
    pub fn new(steps: Vec<OperationStep>) -> Self {
        Self { steps }
    }

    /// Run every step against a copy of `ctx`.
    pub fn execute(&self, ctx: &PoolContext, config: &FeeCurveConfig) -> Result<Executed> {
        let span = info_span!("operation", pool = %ctx.state.address, steps = self.steps.len());
        let _enter = span.enter();

        let mut work = ctx.clone();
        let mut results = Vec::with_capacity(self.steps.len());
        let mut transfers = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let cursor = Cursor { steps: &self.steps, index };
            let result = apply_step(&mut work, step, &cursor, config, &mut transfers)?;
            debug!(index, ?result, "step applied");
            results.push(result);
        }

        settle(work.flash_loan.as_ref())?;

        Ok(Executed { context: work, results, transfers })
    }
}

fn apply_step(
    work:      &mut PoolContext,
    step:      &OperationStep,
    cursor:    &Cursor<'_>,
    config:    &FeeCurveConfig,
    transfers: &mut Vec<Transfer>,
) -> Result<StepResult> {
    let pool = work.state.address;
    match step {
        OperationStep::Deposit(req) => {
            let applied = deposit(&work.state, req)?;
            work.state = applied.state;
            transfers.extend(applied.transfers);
            Ok(StepResult::LpMinted(applied.value))
        }
        OperationStep::Withdraw(req) => {
            let applied = withdraw(&work.state, req)?;
            work.state = applied.state;
            transfers.extend(applied.transfers);
            Ok(StepResult::LamportsWithdrawn(applied.value))
        }
        OperationStep::Unstake(req) => {
            let (next, quote, out) = unstake(work, req, config)?;
            *work = next;
            transfers.extend(out);
            Ok(StepResult::Unstaked(quote))
        }
        OperationStep::DeactivateStake { stake } => {
            let (next, out) = deactivate_stake_account(work, stake)?;
            *work = next;
            transfers.extend(out);
            Ok(StepResult::Deactivated)
        }
        OperationStep::ReclaimStake { stake } => {
            let lamports = work.position(stake).map_or(0, |p| p.stake.lamports);
            let (next, out) = reclaim_stake_account(work, stake)?;
            *work = next;
            transfers.extend(out);
            Ok(StepResult::Reclaimed(lamports))
        }
        OperationStep::TakeFlashLoan { pool: target, .. } | OperationStep::RepayFlashLoan { pool: target, .. }
            if *target != pool =>
        {
            Ok(StepResult::Skipped)
        }
        OperationStep::TakeFlashLoan { lamports, receiver, .. } => {
            let taken = take_flash_loan(
                &work.state,
                work.flash_loan_fee.as_ref(),
                work.flash_loan.as_ref(),
                *lamports,
                receiver,
                cursor,
            )?;
            work.state = taken.state;
            work.flash_loan = Some(taken.marker);
            transfers.extend(taken.transfers);
            Ok(StepResult::Borrowed(*lamports))
        }
        OperationStep::RepayFlashLoan { repayer, protocol_fee_destination, referrer, .. } => {
            let applied = repay_flash_loan(
                &work.state,
                work.flash_loan_fee.as_ref(),
                &work.protocol_fee,
                work.flash_loan.as_ref(),
                RepayAccounts {
                    repayer,
                    protocol_fee_destination,
                    referrer: referrer.as_ref(),
                },
            )?;
            work.state = applied.state;
            work.flash_loan = None;
            transfers.extend(applied.transfers);
            Ok(StepResult::Repaid(applied.value))
        }
        OperationStep::External { transfers: external } => {
            transfers.extend(external.iter().cloned());
            Ok(StepResult::External)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fee::Fee;
    use crate::flash_loan::FlashLoanFee;
    use crate::lifecycle::Clock;
    use crate::pool::tests::empty_state;
    use crate::protocol_fee::ProtocolFee;
    use crate::rational::Rational;

    fn context(liquid: u64) -> PoolContext {
        let mut state = empty_state();
        state.liquid_reserves = liquid;
        state.lp_supply = liquid;
        PoolContext {
            program_id:     crate::pda::UNSTAKE_PROGRAM_ID,
            state,
            fee:            Fee::Flat { ratio: Rational { num: 1, denom: 100 } },
            protocol_fee:   ProtocolFee::default(),
            flash_loan_fee: Some(FlashLoanFee { fee_ratio: Rational { num: 1, denom: 1000 } }),
            flash_loan:     None,
            clock:          Clock { epoch: 9, unix_timestamp: 0 },
            positions:      Vec::new(),
        }
    }

    fn take(ctx: &PoolContext, lamports: u64, receiver: Pubkey) -> OperationStep {
        OperationStep::TakeFlashLoan { pool: ctx.state.address, lamports, receiver }
    }

    fn repay(ctx: &PoolContext, repayer: Pubkey) -> OperationStep {
        OperationStep::RepayFlashLoan {
            pool: ctx.state.address,
            repayer,
            protocol_fee_destination: ctx.protocol_fee.destination,
            referrer: None,
        }
    }

    #[test]
    fn take_without_repay_fails_and_leaves_reserves() {
        let ctx = context(5_000_000_000);
        let op = Operation::new(vec![take(&ctx, 1_000_000_000, Pubkey::new_unique())]);
        assert_eq!(
            op.execute(&ctx, &FeeCurveConfig::default()),
            Err(Error::NoRepayFound { lamports: 1_000_000_000 }),
        );
        assert_eq!(ctx.state.liquid_reserves, 5_000_000_000);
    }

    #[test]
    fn take_external_repay() {
        let ctx = context(5_000_000_000);
        let borrower = Pubkey::new_unique();
        let op = Operation::new(vec![
            take(&ctx, 1_000_000_000, borrower),
            OperationStep::External {
                transfers: vec![Transfer::Lamports { from: borrower, to: Pubkey::new_unique(), lamports: 1 }],
            },
            repay(&ctx, borrower),
        ]);
        let out = op.execute(&ctx, &FeeCurveConfig::default()).unwrap();
        assert_eq!(out.context.flash_loan, None);
        assert_eq!(out.context.state.flash_loaned, 0);
        assert_eq!(out.context.state.liquid_reserves, 5_000_900_000);
        assert_eq!(out.results.len(), 3);
        assert!(matches!(out.results[2], StepResult::Repaid(FlashLoanRepaid { fee: 1_000_000, .. })));
    }

    #[test]
    fn independent_pairs_in_one_operation() {
        let ctx = context(10);
        let who = Pubkey::new_unique();
        let op = Operation::new(vec![
            take(&ctx, 5, who),
            repay(&ctx, who),
            take(&ctx, 7, who),
            repay(&ctx, who),
        ]);
        let out = op.execute(&ctx, &FeeCurveConfig::default()).unwrap();
        // ceil(5/1000) + ceil(7/1000) = 2 lamports of fee; protocol cut floors to 0.
        assert_eq!(out.context.state.liquid_reserves, 12);
    }

    #[test]
    fn second_take_after_last_repay_fails() {
        let ctx = context(10);
        let who = Pubkey::new_unique();
        let op = Operation::new(vec![take(&ctx, 5, who), repay(&ctx, who), take(&ctx, 1, who)]);
        assert_eq!(
            op.execute(&ctx, &FeeCurveConfig::default()),
            Err(Error::NoRepayFound { lamports: 1 }),
        );
    }

    #[test]
    fn failing_step_discards_earlier_steps() {
        let ctx = context(1_000);
        let op = Operation::new(vec![
            OperationStep::Deposit(DepositRequest {
                depositor:        Pubkey::new_unique(),
                lp_token_account: Pubkey::new_unique(),
                lp_mint:          ctx.state.pool.lp_mint,
                lamports:         500,
            }),
            OperationStep::Withdraw(WithdrawRequest {
                owner:            Pubkey::new_unique(),
                lp_token_account: Pubkey::new_unique(),
                lp_mint:          Pubkey::new_unique(),
                to:               Pubkey::new_unique(),
                lp_tokens:        1,
            }),
        ]);
        assert!(matches!(
            op.execute(&ctx, &FeeCurveConfig::default()),
            Err(Error::WrongMintAccount { .. })
        ));
        assert_eq!(ctx.state.liquid_reserves, 1_000);
    }

    #[test]
    fn same_stake_twice_in_one_operation_fails() {
        let ctx = context(100_000_000_000);
        let unstaker = Pubkey::new_unique();
        let req = UnstakeRequest {
            stake: crate::lifecycle::tests::active_position(unstaker, 10_000_000_000),
            unstaker,
            destination: crate::unstake::UnstakeDestination::System(unstaker),
            protocol_fee_destination: ctx.protocol_fee.destination,
            referrer: None,
        };
        let op = Operation::new(vec![OperationStep::Unstake(req.clone()), OperationStep::Unstake(req.clone())]);
        assert_eq!(
            op.execute(&ctx, &FeeCurveConfig::default()),
            Err(Error::PositionAlreadyHeld { stake: req.stake.address }),
        );

        let once = Operation::new(vec![OperationStep::Unstake(req.clone())])
            .execute(&ctx, &FeeCurveConfig::default())
            .unwrap();
        assert_eq!(once.context.state.pool.incoming_stake, 10_000_000_000);
        assert_eq!(once.context.positions.len(), 1);
    }

    #[test]
    fn other_pools_flash_loan_steps_are_skipped() {
        let ctx = context(10);
        let other = Pubkey::new_unique();
        let who = Pubkey::new_unique();
        let op = Operation::new(vec![
            OperationStep::TakeFlashLoan { pool: other, lamports: 5, receiver: who },
            OperationStep::RepayFlashLoan {
                pool: other,
                repayer: who,
                protocol_fee_destination: ctx.protocol_fee.destination,
                referrer: None,
            },
        ]);
        let out = op.execute(&ctx, &FeeCurveConfig::default()).unwrap();
        assert_eq!(out.results, vec![StepResult::Skipped, StepResult::Skipped]);
        assert_eq!(out.context, ctx);
    }

    #[test]
    fn steps_deserialize_from_json() {
        let pool = Pubkey::new_unique();
        let receiver = Pubkey::new_unique();
        let json = format!(
            r#"[{{"step":"take_flash_loan","pool":"{pool}","lamports":5,"receiver":"{receiver}"}}]"#
        );
        let steps: Vec<OperationStep> = serde_json::from_str(&json).unwrap();
        assert_eq!(steps, vec![OperationStep::TakeFlashLoan { pool, lamports: 5, receiver }]);
    }
}
