//! Unstake fee curve.
//!
//! Two variants:
//!
//! | Variant           | Charge                                                         |
//! |-------------------|----------------------------------------------------------------|
//! | `Flat`            | `ceil(S × ratio)`                                              |
//! | `LiquidityLinear` | `ceil(∫ ratio(l) dl)` over the liquid lamports this unstake drains |
//!
//! For `LiquidityLinear` the instantaneous ratio is linear in `r = l / O`,
//! where `l` is the liquid lamports left in reserves and `O` the lamports the
//! pool owns before the unstake: `ratio(O) = max_liq_remaining`,
//! `ratio(0) = zero_liq_remaining`. Charging the integral from `L - S` to `L`
//! makes one quote of `X` equal the sum of quotes for smaller slices of `X`,
//! up to one lamport of rounding per slice, provided each slice is priced
//! after the previous one drained exactly its own size from `liquid` into
//! `incoming`. Chained [`crate::unstake()`] calls do not follow that drain:
//! they pay out `S - fee` and keep the fee in reserves, so splitting an
//! unstake ends up slightly cheaper than doing it whole.
//!
//! ```text
//!   ratio
//!   zero_liq ─┐
//!             │╲
//!             │ ╲
//!             │  ╲▒▒▒▒▒▒▒     ▒ = fee / S
//!             │   ╲▒▒▒▒▒▒
//!   max_liq  ─┤    ╲▒▒▒▒▒
//!             └─────┴────┴───▶ l (liquid lamports)
//!             0   L-S    L   O
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rational::{wide_ceil_div, wide_to_u64, Rational, U512};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fee {
    Flat { ratio: Rational },
    LiquidityLinear { params: LiquidityLinearParams },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityLinearParams {
    /// Ratio charged while all owned lamports are still liquid.
    pub max_liq_remaining:  Rational,
    /// Ratio charged as the last liquid lamport leaves.
    pub zero_liq_remaining: Rational,
}

/// Pool balances a quote is priced against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBalance {
    pub incoming_stake:  u64,
    pub liquid_reserves: u64,
}

/// Tunables applied to every quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCurveConfig {
    /// Lamports of the reserves balance that are never available for
    /// unstaking, e.g. the reserves account's rent-exempt minimum. Subtracted
    /// from both the liquid and the owned lamports before pricing.
    pub owned_lamports_overhead: u64,
}

// ─── Validation ───────────────────────────────────────────────────────────────

impl Fee {
    /// Run when a fee is set; quotes assume a validated fee.
    pub fn validate(&self) -> Result<()> {
        match self {
            Fee::Flat { ratio } => ratio.validate_proper("flat.ratio"),
            Fee::LiquidityLinear { params } => params.validate(),
        }
    }
}

impl LiquidityLinearParams {
    pub fn validate(&self) -> Result<()> {
        self.max_liq_remaining.validate_proper("liquidity_linear.max_liq_remaining")?;
        self.zero_liq_remaining.validate_proper("liquidity_linear.zero_liq_remaining")?;
        if self.max_liq_remaining > self.zero_liq_remaining {
            return Err(Error::InvalidFeeParameters(format!(
                "max_liq_remaining {} > zero_liq_remaining {}",
                self.max_liq_remaining, self.zero_liq_remaining,
            )));
        }
        Ok(())
    }
}

// ─── Quote ────────────────────────────────────────────────────────────────────

impl PoolBalance {
    /// Liquid lamports an unstake may draw on.
    pub fn available(&self, config: &FeeCurveConfig) -> u64 {
        self.liquid_reserves.saturating_sub(config.owned_lamports_overhead)
    }

    /// Lamports owned by the pool, net of the configured overhead.
    pub fn owned(&self, config: &FeeCurveConfig) -> Result<u64> {
        self.incoming_stake
            .checked_add(self.available(config))
            .ok_or(Error::MathOverflow)
    }
}

impl Fee {
    /// Lamports charged for unstaking `redeem_lamports` against `balance`.
    pub fn quote(&self, balance: PoolBalance, redeem_lamports: u64, config: &FeeCurveConfig) -> Result<u64> {
        let available = balance.available(config);
        if redeem_lamports > available {
            return Err(Error::NotEnoughLiquidity { requested: redeem_lamports, available });
        }
        match self {
            Fee::Flat { ratio } => ratio.ceil_mul(redeem_lamports),
            Fee::LiquidityLinear { params } => {
                params.integrate(balance.owned(config)?, available, redeem_lamports)
            }
        }
    }

    /// Smallest stake size `S` with `S - quote(S) >= lamports_after_fee`.
    ///
    /// The net payout `S - quote(S)` never decreases as `S` grows, so this is
    /// a binary search over `[lamports_after_fee, available]`.
    pub fn reverse_quote(
        &self,
        balance:            PoolBalance,
        lamports_after_fee: u64,
        config:             &FeeCurveConfig,
    ) -> Result<u64> {
        let net = |s: u64| -> Result<u64> {
            s.checked_sub(self.quote(balance, s, config)?).ok_or(Error::MathOverflow)
        };

        let available = balance.available(config);
        if lamports_after_fee > available || net(available)? < lamports_after_fee {
            return Err(Error::NotEnoughLiquidity { requested: lamports_after_fee, available });
        }

        let (mut lo, mut hi) = (lamports_after_fee, available);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if net(mid)? >= lamports_after_fee {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }
}

impl LiquidityLinearParams {
    /// `ceil( S·(zN·2O − dN·(2L − S)) / (D·2O) )` with both ratios over the
    /// common denominator `D`, `zN`/`mN` their numerators and `dN = zN − mN`.
    fn integrate(&self, owned: u64, liquid: u64, s: u64) -> Result<u64> {
        if s == 0 {
            return Ok(0);
        }
        let (zn, zd) = self.zero_liq_remaining.wide();
        let (mn, md) = self.max_liq_remaining.wide();

        let denom_common = zd * md;
        let z_num = zn * md;
        let m_num = mn * zd;
        let slope_num = z_num.checked_sub(m_num).ok_or(Error::MathOverflow)?;

        let s = U512::from(s);
        let two_owned = U512::from(owned) * U512::from(2u8);
        let two_liquid_minus_s = (U512::from(liquid) * U512::from(2u8))
            .checked_sub(s)
            .ok_or(Error::MathOverflow)?;

        let numerator = (z_num * two_owned)
            .checked_sub(slope_num * two_liquid_minus_s)
            .ok_or(Error::MathOverflow)?
            * s;
        let denominator = denom_common * two_owned;

        wide_to_u64(wide_ceil_div(numerator, denominator)?)
    }
}

/// Free-function form of [`Fee::quote`].
pub fn quote(fee: &Fee, balance: PoolBalance, redeem_lamports: u64, config: &FeeCurveConfig) -> Result<u64> {
    fee.quote(balance, redeem_lamports, config)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn flat(num: u64, denom: u64) -> Fee {
        Fee::Flat { ratio: Rational::ratio_of(num, denom).unwrap() }
    }

    fn linear(max: (u64, u64), zero: (u64, u64)) -> Fee {
        Fee::LiquidityLinear {
            params: LiquidityLinearParams {
                max_liq_remaining:  Rational::ratio_of(max.0, max.1).unwrap(),
                zero_liq_remaining: Rational::ratio_of(zero.0, zero.1).unwrap(),
            },
        }
    }

    fn balance(incoming_stake: u64, liquid_reserves: u64) -> PoolBalance {
        PoolBalance { incoming_stake, liquid_reserves }
    }

    const NO_OVERHEAD: FeeCurveConfig = FeeCurveConfig { owned_lamports_overhead: 0 };

    #[test]
    fn flat_end_to_end_example() {
        let fee = flat(69, 1000);
        let charged = fee.quote(balance(0, 10_000_000_000), 1_000_000_000, &NO_OVERHEAD).unwrap();
        assert_eq!(charged, 69_000_000);
        assert_eq!(1_000_000_000 - charged, 931_000_000);
    }

    #[test]
    fn liquidity_check_uses_gross_amount() {
        let fee = flat(1, 100);
        assert_eq!(
            fee.quote(balance(0, 999), 1_000, &NO_OVERHEAD),
            Err(Error::NotEnoughLiquidity { requested: 1_000, available: 999 }),
        );
        assert!(fee.quote(balance(0, 1_000), 1_000, &NO_OVERHEAD).is_ok());
    }

    #[test]
    fn overhead_reduces_available_liquidity() {
        let fee = flat(1, 100);
        let config = FeeCurveConfig { owned_lamports_overhead: 1_002_240 };
        assert_eq!(
            fee.quote(balance(0, 2_000_000), 1_000_000, &config),
            Err(Error::NotEnoughLiquidity { requested: 1_000_000, available: 997_760 }),
        );
    }

    #[test]
    fn constant_ratio_when_endpoints_match() {
        let fee = linear((3, 100), (3, 100));
        let charged = fee.quote(balance(5_000, 5_000), 1_000, &NO_OVERHEAD).unwrap();
        assert_eq!(charged, 30);
    }

    #[test]
    fn draining_everything_charges_midpoint_ratio() {
        // All lamports liquid, drain all of them: average of 1% and 3%.
        let fee = linear((1, 100), (3, 100));
        let charged = fee.quote(balance(0, 1_000_000), 1_000_000, &NO_OVERHEAD).unwrap();
        assert_eq!(charged, 20_000);
    }

    #[test]
    fn partially_illiquid_pool() {
        // O = 1000, L = 500, drain 500: ratio rises from 2% to 3%, average 2.5%.
        let fee = linear((1, 100), (3, 100));
        let charged = fee.quote(balance(500, 500), 500, &NO_OVERHEAD).unwrap();
        assert_eq!(charged, 13); // ceil(12.5)
    }

    #[test]
    fn zero_redeem_is_free() {
        let fee = linear((1, 100), (3, 100));
        assert_eq!(fee.quote(balance(0, 0), 0, &NO_OVERHEAD).unwrap(), 0);
    }

    #[test]
    fn validation() {
        assert!(flat(69, 1000).validate().is_ok());
        assert!(flat(1001, 1000).validate().is_err());
        assert!(linear((1, 100), (3, 100)).validate().is_ok());
        assert!(matches!(
            linear((3, 100), (1, 100)).validate(),
            Err(Error::InvalidFeeParameters(_))
        ));
        let bad = Fee::Flat { ratio: Rational { num: 0, denom: 0 } };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn reverse_quote_flat() {
        let fee = flat(69, 1000);
        let s = fee.reverse_quote(balance(0, 10_000_000_000), 931_000_000, &NO_OVERHEAD).unwrap();
        assert_eq!(s, 1_000_000_000);
    }

    #[test]
    fn reverse_quote_out_of_liquidity() {
        let fee = flat(1, 10);
        assert!(matches!(
            fee.reverse_quote(balance(0, 1_000), 950, &NO_OVERHEAD),
            Err(Error::NotEnoughLiquidity { .. })
        ));
    }

    #[test]
    fn serde_tagged_shape() {
        let json = r#"{"type":"flat","ratio":{"num":69,"denom":1000}}"#;
        let fee: Fee = serde_json::from_str(json).unwrap();
        assert_eq!(fee, flat(69, 1000));
    }

    prop_compose! {
        fn proper_ratio()
            (denom in 1..=1_000_000u64)
            (num in 0..=denom, denom in Just(denom)) -> Rational {
                Rational::ratio_of(num, denom).unwrap()
            }
    }

    prop_compose! {
        fn linear_fee()(a in proper_ratio(), b in proper_ratio()) -> Fee {
            Fee::LiquidityLinear {
                params: LiquidityLinearParams {
                    max_liq_remaining:  a.min(b),
                    zero_liq_remaining: a.max(b),
                },
            }
        }
    }

    proptest! {
        #[test]
        fn monotone_as_liquidity_shifts_to_incoming(
            fee in linear_fee(),
            owned in 1_000u64..1_000_000_000_000,
            frac in 1u64..1_000,
            s_frac in 1u64..1_000,
        ) {
            let liquid = owned / 1_000 * frac;
            let s = liquid / 1_000 * s_frac;
            let shallower = liquid - liquid / 10;
            prop_assume!(s <= shallower);

            let deep = fee.quote(balance(owned - liquid, liquid), s, &NO_OVERHEAD).unwrap();
            let thin = fee.quote(balance(owned - shallower, shallower), s, &NO_OVERHEAD).unwrap();
            prop_assert!(thin >= deep);
        }

        #[test]
        fn monotone_as_reserves_drain(
            fee in linear_fee(),
            incoming in 0u64..1_000_000_000_000,
            liquid in 1u64..1_000_000_000_000,
            drained in 0u64..1_000_000_000_000,
            s in 0u64..1_000_000_000_000,
        ) {
            let after = liquid.saturating_sub(drained);
            prop_assume!(s <= after);
            let full = fee.quote(balance(incoming, liquid), s, &NO_OVERHEAD).unwrap();
            let thin = fee.quote(balance(incoming, after), s, &NO_OVERHEAD).unwrap();
            prop_assert!(thin >= full);
        }

        // Quote additivity over a fixed drain: the second half is priced
        // after exactly `first` lamports moved from liquid to incoming.
        #[test]
        fn split_in_halves_within_one(
            fee in linear_fee(),
            incoming in 0u64..1_000_000_000_000,
            liquid in 2u64..1_000_000_000_000,
            x_frac in 1u64..=1_000,
        ) {
            let x = (liquid / 1_000 * x_frac).max(2);
            prop_assume!(x <= liquid);
            let first = x / 2;
            let second = x - first;

            let whole = fee.quote(balance(incoming, liquid), x, &NO_OVERHEAD).unwrap();
            let a = fee.quote(balance(incoming, liquid), first, &NO_OVERHEAD).unwrap();
            let b = fee
                .quote(balance(incoming + first, liquid - first), second, &NO_OVERHEAD)
                .unwrap();
            let halves = a + b;
            prop_assert!(halves.abs_diff(whole) <= 1, "whole={} halves={}", whole, halves);
        }

        #[test]
        fn fee_never_exceeds_redeemed(
            fee in linear_fee(),
            incoming: u32,
            liquid: u32,
            s: u32,
        ) {
            prop_assume!(s <= liquid);
            let charged = fee.quote(balance(incoming.into(), liquid.into()), s.into(), &NO_OVERHEAD).unwrap();
            prop_assert!(charged <= u64::from(s));
        }

        #[test]
        fn reverse_quote_is_minimal(
            fee in linear_fee(),
            incoming in 0u64..1_000_000_000,
            liquid in 1u64..1_000_000_000,
            target_frac in 0u64..500,
        ) {
            let target = liquid / 1_000 * target_frac;
            let b = balance(incoming, liquid);
            if let Ok(s) = fee.reverse_quote(b, target, &NO_OVERHEAD) {
                prop_assert!(s - fee.quote(b, s, &NO_OVERHEAD).unwrap() >= target);
                if s > 0 {
                    let below = s - 1;
                    prop_assert!(below - fee.quote(b, below, &NO_OVERHEAD).unwrap() < target);
                }
            }
        }
    }
}
