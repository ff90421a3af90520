//! Stake position lifecycle.
//!
//! A position is classified purely from the two epochs recorded on its
//! delegation and the current epoch:
//!
//! ```text
//! Uninitialized ─▶ Inactive ─▶ Activating ─▶ Active ─▶ Deactivating ─▶ Inactive
//! ```
//!
//! Only `Active`, unlocked stake can be redeemed. Only stake that went through
//! `Deactivating` and is now `Inactive` can be reclaimed into reserves.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::{Error, Result};
use crate::serde_helpers::pubkey_str;

/// Sentinel deactivation epoch of a delegation that was never deactivated.
pub const NOT_DEACTIVATED: u64 = u64::MAX;

// ─── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Uninitialized,
    Inactive,
    Activating,
    Active,
    Deactivating,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Uninitialized => "uninitialized",
            PositionState::Inactive      => "inactive",
            PositionState::Activating    => "activating",
            PositionState::Active        => "active",
            PositionState::Deactivating  => "deactivating",
        }
    }
}

/// Classify a delegation from `(activation_epoch, deactivation_epoch, current_epoch)`.
pub fn classify(activation_epoch: u64, deactivation_epoch: u64, current_epoch: u64) -> PositionState {
    use std::cmp::Ordering::*;

    match activation_epoch.cmp(&current_epoch) {
        Greater => PositionState::Inactive,
        Equal if deactivation_epoch == activation_epoch => PositionState::Inactive,
        Equal => PositionState::Activating,
        Less => match deactivation_epoch.cmp(&current_epoch) {
            Greater => PositionState::Active,
            Equal => PositionState::Deactivating,
            Less => PositionState::Inactive,
        },
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// Ledger time as seen by the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub epoch:          u64,
    pub unix_timestamp: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockup {
    pub unix_timestamp: i64,
    pub epoch:          u64,
    #[serde(with = "pubkey_str")]
    pub custodian:      Pubkey,
}

impl Lockup {
    /// A lockup binds until both its epoch and its timestamp have passed,
    /// unless the custodian is party to the operation.
    pub fn is_in_force(&self, clock: &Clock, custodian: Option<&Pubkey>) -> bool {
        if custodian == Some(&self.custodian) {
            return false;
        }
        self.unix_timestamp > clock.unix_timestamp || self.epoch > clock.epoch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(with = "pubkey_str")]
    pub voter:              Pubkey,
    pub stake:              u64,
    pub activation_epoch:   u64,
    pub deactivation_epoch: u64,
}

/// The parts of a stake account the pool reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    #[serde(with = "pubkey_str")]
    pub address:     Pubkey,
    pub lamports:    u64,
    /// `false` for a never-initialized stake account.
    pub initialized: bool,
    #[serde(with = "pubkey_str")]
    pub staker:      Pubkey,
    #[serde(with = "pubkey_str")]
    pub withdrawer:  Pubkey,
    pub lockup:      Lockup,
    pub delegation:  Option<Delegation>,
}

impl StakePosition {
    pub fn state(&self, current_epoch: u64) -> PositionState {
        match (&self.delegation, self.initialized) {
            (Some(d), _) => classify(d.activation_epoch, d.deactivation_epoch, current_epoch),
            (None, true) => PositionState::Inactive,
            (None, false) => PositionState::Uninitialized,
        }
    }

    pub fn is_owned_by(&self, reserves: &Pubkey) -> bool {
        self.staker == *reserves && self.withdrawer == *reserves
    }

    fn was_deactivated(&self) -> bool {
        self.delegation
            .map(|d| d.deactivation_epoch != NOT_DEACTIVATED)
            .unwrap_or(false)
    }
}

/// Snapshot taken when the pool takes custody of a stake account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub lamports_at_creation: u64,
}

// ─── Guards ───────────────────────────────────────────────────────────────────

/// Unlocked and `Active`. The lockup is checked first, whatever the activation state.
pub fn ensure_redeemable(position: &StakePosition, clock: &Clock) -> Result<()> {
    if position.lockup.is_in_force(clock, None) {
        return Err(Error::LockedUp {
            stake:          position.address,
            epoch:          position.lockup.epoch,
            unix_timestamp: position.lockup.unix_timestamp,
        });
    }
    match position.state(clock.epoch) {
        PositionState::Active => Ok(()),
        state => Err(Error::PositionNotRedeemable { stake: position.address, state }),
    }
}

/// Pool-owned and still earning (or about to earn) rewards.
pub fn ensure_deactivatable(position: &StakePosition, reserves: &Pubkey, clock: &Clock) -> Result<()> {
    ensure_owned_by(position, reserves)?;
    match position.state(clock.epoch) {
        PositionState::Active | PositionState::Activating => Ok(()),
        state => Err(Error::PositionNotDeactivatable { stake: position.address, state }),
    }
}

/// Pool-owned, fully deactivated after a recorded deactivation.
pub fn ensure_reclaimable(position: &StakePosition, reserves: &Pubkey, clock: &Clock) -> Result<()> {
    ensure_owned_by(position, reserves)?;
    let state = position.state(clock.epoch);
    if state == PositionState::Inactive && position.was_deactivated() {
        Ok(())
    } else {
        Err(Error::PositionNotReclaimable { stake: position.address, state })
    }
}

pub fn ensure_owned_by(position: &StakePosition, reserves: &Pubkey) -> Result<()> {
    if position.is_owned_by(reserves) {
        Ok(())
    } else {
        Err(Error::PositionNotOwnedByPool { stake: position.address, reserves: *reserves })
    }
}
