//! Core error type.

use solana_sdk::pubkey::Pubkey;

use crate::lifecycle::PositionState;

/// All errors returned by the unstake core.
///
/// Every variant is a local validation failure. The core never retries and
/// never partially applies an operation that returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // ── Fee parameters ───────────────────────────────────────────────────────
    /// A ratio outside `[0, 1]`, a zero denominator, or `max_liq_remaining > zero_liq_remaining`.
    #[error("Fee parameters violate the fee invariants: {0}")]
    InvalidFeeParameters(String),

    // ── Liquidity ────────────────────────────────────────────────────────────
    /// An unstake asks for more liquid SOL than the pool's reserves hold.
    #[error("Not enough liquidity to service this unstake: requested={requested}, available={available}")]
    NotEnoughLiquidity { requested: u64, available: u64 },

    /// A withdrawal or flash loan exceeds the pool's liquid reserves.
    #[error("Insufficient reserves: requested={requested}, available={available}")]
    InsufficientReserves { requested: u64, available: u64 },

    /// The deposit is too small to mint a single LP token.
    #[error("Liquidity to add too little: {amount} lamports mints 0 LP tokens")]
    LiquidityToAddTooLittle { amount: u64 },

    /// Burning more LP tokens than exist.
    #[error("Cannot burn {shares} LP tokens; supply is {supply}")]
    BurnExceedsSupply { shares: u64, supply: u64 },

    // ── Stake positions ──────────────────────────────────────────────────────
    /// The stake account's lockup is still in force.
    #[error("Stake account {stake} is locked up until epoch {epoch} / unix time {unix_timestamp}")]
    LockedUp { stake: Pubkey, epoch: u64, unix_timestamp: i64 },

    #[error("Stake account {stake} is {state:?}; only active stake can be unstaked")]
    PositionNotRedeemable { stake: Pubkey, state: PositionState },

    #[error("Stake account {stake} is {state:?}; only active or activating stake can be deactivated")]
    PositionNotDeactivatable { stake: Pubkey, state: PositionState },

    #[error("Stake account {stake} is {state:?}; only fully deactivated stake can be reclaimed")]
    PositionNotReclaimable { stake: Pubkey, state: PositionState },

    /// The pool already has custody of this stake account.
    #[error("Stake account {stake} is already held by the pool")]
    PositionAlreadyHeld { stake: Pubkey },

    /// The unstaker is not both staker and withdrawer of the stake account.
    #[error("{unstaker} is not the staker and withdrawer of stake account {stake}")]
    UnstakerNotAuthority { stake: Pubkey, unstaker: Pubkey },

    /// The stake account's authorities are not the pool's reserves.
    #[error("Stake account {stake} is not owned by pool reserves {reserves}")]
    PositionNotOwnedByPool { stake: Pubkey, reserves: Pubkey },

    // ── Flash loans ──────────────────────────────────────────────────────────
    /// A flash loan is outstanding with no repay step to settle it.
    #[error("No flash loan repay found for {lamports} borrowed lamports")]
    NoRepayFound { lamports: u64 },

    #[error("Repay step without an outstanding flash loan")]
    RepayWithoutLoan,

    /// The pool has no flash loan fee account, so flash loans are not offered.
    #[error("Flash loans are not enabled for pool {0}")]
    FlashLoansDisabled(Pubkey),

    // ── Account references ───────────────────────────────────────────────────
    #[error("Wrong protocol fee destination: expected {expected}, got {got}")]
    WrongProtocolFeeDestination { expected: Pubkey, got: Pubkey },

    #[error("Wrong LP mint: expected {expected}, got {got}")]
    WrongMintAccount { expected: Pubkey, got: Pubkey },

    #[error("{got} is not the fee authority of this pool (expected {expected})")]
    InvalidFeeAuthority { expected: Pubkey, got: Pubkey },

    #[error("{got} is not the protocol fee authority (expected {expected})")]
    InvalidProtocolFeeAuthority { expected: Pubkey, got: Pubkey },

    // ── Arithmetic ───────────────────────────────────────────────────────────
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Integer overflow in pool / fee math")]
    MathOverflow,

    // ── Ledger collaborator ──────────────────────────────────────────────────
    #[error("Account {0} not found")]
    AccountNotFound(Pubkey),

    /// Raw account bytes could not be deserialized.
    #[error("Account parse error at offset {offset}: {reason}")]
    ParseError { offset: usize, reason: String },

    /// The ledger oracle failed; the message comes from the transport.
    #[error("Ledger error: {0}")]
    Ledger(String),
}

/// Convenience alias so every module can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;
