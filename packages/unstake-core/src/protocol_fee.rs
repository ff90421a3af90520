//! Protocol fee account and the protocol / referrer split of a collected fee.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::{Error, Result};
use crate::rational::Rational;
use crate::serde_helpers::pubkey_str;

/// Destination of the protocol's share until the authority changes it.
pub const DEFAULT_PROTOCOL_FEE_DESTINATION: Pubkey =
    solana_sdk::pubkey!("3Gdk8hMa76JF8p5jonMP7vYPZuXRTJDtLmysYabB6WEE");

/// Authority allowed to change the protocol fee until it hands it off.
pub const DEFAULT_PROTOCOL_FEE_AUTHORITY: Pubkey =
    solana_sdk::pubkey!("4e3CRid3ugjAFRjSnmbbLie1CaeU41CBYhk4saKQgwBB");

/// Global protocol fee configuration, one per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFee {
    #[serde(with = "pubkey_str")]
    pub destination:        Pubkey,
    #[serde(with = "pubkey_str")]
    pub authority:          Pubkey,
    /// Share of every collected fee that leaves the pool.
    pub fee_ratio:          Rational,
    /// Share of the protocol's cut that goes to a referrer, when one is given.
    pub referrer_fee_ratio: Rational,
}

impl Default for ProtocolFee {
    /// 10% of fees to the protocol, half of that to a referrer.
    fn default() -> Self {
        Self {
            destination:        DEFAULT_PROTOCOL_FEE_DESTINATION,
            authority:          DEFAULT_PROTOCOL_FEE_AUTHORITY,
            fee_ratio:          Rational { num: 1, denom: 10 },
            referrer_fee_ratio: Rational { num: 1, denom: 2 },
        }
    }
}

/// Where a collected fee ends up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub protocol_lamports: u64,
    pub referrer_lamports: u64,
    /// Stays in the pool for liquidity providers.
    pub pool_lamports:     u64,
}

impl FeeSplit {
    /// Lamports leaving the pool.
    pub fn total_protocol(&self) -> u64 {
        self.protocol_lamports + self.referrer_lamports
    }
}

impl ProtocolFee {
    pub fn validate(&self) -> Result<()> {
        self.fee_ratio.validate_proper("protocol_fee.fee_ratio")?;
        self.referrer_fee_ratio.validate_proper("protocol_fee.referrer_fee_ratio")
    }

    /// Divide `gross_fee` between protocol, referrer and pool, rounding down.
    ///
    /// Without a referrer the whole protocol cut goes to the destination; it
    /// is never handed back to the pool.
    pub fn split(&self, gross_fee: u64, has_referrer: bool) -> Result<FeeSplit> {
        let total = self.fee_ratio.floor_mul(gross_fee)?;
        let referrer_lamports = if has_referrer {
            self.referrer_fee_ratio.floor_mul(total)?
        } else {
            0
        };
        let protocol_lamports = total.checked_sub(referrer_lamports).ok_or(Error::MathOverflow)?;
        let pool_lamports = gross_fee.checked_sub(total).ok_or(Error::MathOverflow)?;
        Ok(FeeSplit { protocol_lamports, referrer_lamports, pool_lamports })
    }

    /// Fail unless `got` is this account's destination.
    pub fn check_destination(&self, got: &Pubkey) -> Result<()> {
        if *got == self.destination {
            Ok(())
        } else {
            Err(Error::WrongProtocolFeeDestination { expected: self.destination, got: *got })
        }
    }
}

/// Free-function form of [`ProtocolFee::split`].
pub fn split(protocol_fee: &ProtocolFee, gross_fee: u64, has_referrer: bool) -> Result<FeeSplit> {
    protocol_fee.split(gross_fee, has_referrer)
}
