//! External effects an operation asks the host ledger to perform.
//!
//! The core never moves lamports itself. Every operation returns the new
//! state together with the ordered list of [`Transfer`]s that make the ledger
//! agree with it.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::serde_helpers::pubkey_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeAuthority {
    Staker,
    Withdrawer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transfer {
    /// Move lamports between two system-owned accounts.
    Lamports {
        #[serde(with = "pubkey_str")]
        from:     Pubkey,
        #[serde(with = "pubkey_str")]
        to:       Pubkey,
        lamports: u64,
    },
    MintLp {
        #[serde(with = "pubkey_str")]
        mint:   Pubkey,
        #[serde(with = "pubkey_str")]
        to:     Pubkey,
        amount: u64,
    },
    BurnLp {
        #[serde(with = "pubkey_str")]
        mint:      Pubkey,
        #[serde(with = "pubkey_str")]
        from:      Pubkey,
        #[serde(with = "pubkey_str")]
        authority: Pubkey,
        amount:    u64,
    },
    AuthorizeStake {
        #[serde(with = "pubkey_str")]
        stake:         Pubkey,
        #[serde(with = "pubkey_str")]
        authority:     Pubkey,
        #[serde(with = "pubkey_str")]
        new_authority: Pubkey,
        role:          StakeAuthority,
    },
    DeactivateStake {
        #[serde(with = "pubkey_str")]
        stake: Pubkey,
    },
    /// Withdraw a fully deactivated stake account's lamports.
    WithdrawStake {
        #[serde(with = "pubkey_str")]
        stake:    Pubkey,
        #[serde(with = "pubkey_str")]
        to:       Pubkey,
        lamports: u64,
    },
    /// Resync a wrapped-SOL token account after lamports were sent to it.
    SyncNative {
        #[serde(with = "pubkey_str")]
        account: Pubkey,
    },
    CreatePositionRecord {
        #[serde(with = "pubkey_str")]
        pool:                 Pubkey,
        #[serde(with = "pubkey_str")]
        stake:                Pubkey,
        lamports_at_creation: u64,
    },
    ClosePositionRecord {
        #[serde(with = "pubkey_str")]
        pool:  Pubkey,
        #[serde(with = "pubkey_str")]
        stake: Pubkey,
    },
    /// Create or grow the pool's flash loan marker.
    WriteFlashLoanMarker {
        #[serde(with = "pubkey_str")]
        pool:              Pubkey,
        lamports_borrowed: u64,
    },
    CloseFlashLoanMarker {
        #[serde(with = "pubkey_str")]
        pool: Pubkey,
    },
}

impl Transfer {
    /// Lamport transfer, or `None` for a zero amount.
    pub(crate) fn lamports(from: Pubkey, to: Pubkey, lamports: u64) -> Option<Transfer> {
        (lamports > 0).then_some(Transfer::Lamports { from, to, lamports })
    }
}
