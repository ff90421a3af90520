//! Unstake core
//!
//! Accounting and pricing for an instant-unstake liquidity pool on Solana.
//! Liquidity providers deposit SOL; stakers sell active stake accounts to the
//! pool for SOL right away and pay a fee that rises as the pool's liquid
//! reserves drain.
//!
//! Every operation is a pure function over an explicit snapshot. It returns
//! the new snapshot plus the [`Transfer`]s the ledger must carry out, or an
//! [`Error`] with nothing applied. No I/O happens here; [`LedgerOracle`] is
//! implemented by the caller.
//!
//! # Quick Start
//!
//! ```rust
//! use unstake_core::{Fee, FeeCurveConfig, PoolBalance, ProtocolFee, Rational};
//!
//! let fee = Fee::Flat { ratio: Rational::ratio_of(69, 1000)? };
//! fee.validate()?;
//!
//! let balance = PoolBalance { incoming_stake: 0, liquid_reserves: 10_000_000_000 };
//! let charged = fee.quote(balance, 1_000_000_000, &FeeCurveConfig::default())?;
//! assert_eq!(charged, 69_000_000);
//!
//! let split = ProtocolFee::default().split(charged, false)?;
//! assert_eq!(split.protocol_lamports, 6_900_000);
//! # Ok::<(), unstake_core::Error>(())
//! ```
//!
//! # Feature Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`Fee::quote`] | Unstake fee for a pool balance (flat or liquidity-linear) |
//! | [`Fee::reverse_quote`] | Stake size needed for a target payout |
//! | [`ProtocolFee::split`] | Protocol / referrer / pool shares of a fee |
//! | [`deposit`] / [`withdraw`] | LP token mint and burn |
//! | [`intake`] / [`reclaim`] | Pool takes custody of stake / folds it back into reserves |
//! | [`classify`] | Stake lifecycle state from its epochs |
//! | [`unstake()`] | The whole unstake flow against a [`PoolContext`] |
//! | [`take_flash_loan`] / [`repay_flash_loan`] | Same-operation loans of reserves |
//! | [`Operation::execute`] | Atomic multi-step operation with flash loan settlement |

pub mod admin;
pub mod error;
pub mod fee;
pub mod flash_loan;
pub mod ledger;
pub mod lifecycle;
pub mod operation;
pub mod pda;
pub mod pool;
pub mod protocol_fee;
pub mod rational;
pub mod state;
pub mod transfer;
pub mod unstake;

mod serde_helpers;

pub use admin::{
    create_pool, deactivate_stake_account, reclaim_stake_account, set_fee, set_fee_authority,
    set_flash_loan_fee, set_protocol_fee, CreatePoolParams,
};
pub use error::{Error, Result};
pub use fee::{quote, Fee, FeeCurveConfig, LiquidityLinearParams, PoolBalance};
pub use flash_loan::{
    repay_flash_loan, settle, take_flash_loan, FlashLoanFee, FlashLoanMarker,
    InstructionIntrospection, RepayAccounts, StepList, StepSummary,
};
pub use ledger::{load_stake_position, LedgerOracle, OwnedPosition, PoolContext};
pub use lifecycle::{
    classify, ensure_deactivatable, ensure_reclaimable, ensure_redeemable, Clock, Delegation,
    Lockup, PositionRecord, PositionState, StakePosition,
};
pub use operation::{Executed, Operation, OperationStep, StepResult};
pub use pool::{deposit, intake, reclaim, withdraw, Applied, DepositRequest, Pool, PoolState, WithdrawRequest};
pub use protocol_fee::{split, FeeSplit, ProtocolFee};
pub use rational::Rational;
pub use transfer::{StakeAuthority, Transfer};
pub use unstake::{preview_unstake, unstake, UnstakeDestination, UnstakeQuote, UnstakeRequest};
