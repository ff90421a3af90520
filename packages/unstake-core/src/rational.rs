//! Exact fractions.
//!
//! Every fee and share computation goes through [`Rational`] and the wide
//! integers below; there is no floating point anywhere a conservation check
//! depends on the result.
//!
//! Rounding policy, used by the callers:
//! * fees round **up** ([`Rational::ceil_mul`]),
//! * LP mint/burn amounts and the protocol/referrer split round **down**
//!   ([`Rational::floor_mul`]).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod wide {
    #![allow(clippy::all)]
    use uint::construct_uint;

    construct_uint! {
        /// 512-bit unsigned integer for intermediate products.
        pub struct U512(8);
    }
}

pub(crate) use wide::U512;

/// Narrow a wide intermediate back to `u64`, failing instead of truncating.
pub(crate) fn wide_to_u64(v: U512) -> Result<u64> {
    if v > U512::from(u64::MAX) {
        return Err(Error::MathOverflow);
    }
    Ok(v.low_u64())
}

/// `ceil(num / denom)` on wide integers.
pub(crate) fn wide_ceil_div(num: U512, denom: U512) -> Result<U512> {
    if denom.is_zero() {
        return Err(Error::MathOverflow);
    }
    let (q, r) = num.div_mod(denom);
    if r.is_zero() {
        Ok(q)
    } else {
        q.checked_add(U512::one()).ok_or(Error::MathOverflow)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

// ─── Rational ─────────────────────────────────────────────────────────────────

/// A non-negative fraction `num / denom`.
///
/// Equality and ordering compare values, so `1/2 == 2/4`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rational {
    pub num:   u128,
    pub denom: u128,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, denom: 1 };
    pub const ONE:  Rational = Rational { num: 1, denom: 1 };

    /// Build a fraction, rejecting a zero denominator.
    pub fn new(num: u128, denom: u128) -> Result<Self> {
        if denom == 0 {
            return Err(Error::InvalidFeeParameters(format!("{num}/0 has a zero denominator")));
        }
        Ok(Self { num, denom })
    }

    /// `num / denom` from two integers, e.g. `Rational::ratio_of(69, 1000)`.
    pub fn ratio_of(num: u64, denom: u64) -> Result<Self> {
        Self::new(num.into(), denom.into())
    }

    pub fn is_valid(&self) -> bool {
        self.denom != 0
    }

    pub fn is_lte_one(&self) -> bool {
        self.num <= self.denom
    }

    /// A proper fraction in `[0, 1]`.
    pub fn is_proper(&self) -> bool {
        self.is_valid() && self.is_lte_one()
    }

    /// Reject anything that is not a proper fraction, naming the field.
    pub fn validate_proper(&self, field: &str) -> Result<()> {
        if self.is_proper() {
            Ok(())
        } else {
            Err(Error::InvalidFeeParameters(format!(
                "{field} = {self} is not a fraction in [0, 1]"
            )))
        }
    }

    /// Lowest terms.
    pub fn reduced(&self) -> Self {
        let g = gcd(self.num, self.denom);
        if g <= 1 {
            return *self;
        }
        Self { num: self.num / g, denom: self.denom / g }
    }

    pub fn checked_add(&self, other: &Rational) -> Result<Rational> {
        let (a, b) = (self.reduced(), other.reduced());
        let denom = a.denom.checked_mul(b.denom).ok_or(Error::MathOverflow)?;
        let num = a
            .num
            .checked_mul(b.denom)
            .and_then(|l| b.num.checked_mul(a.denom).and_then(|r| l.checked_add(r)))
            .ok_or(Error::MathOverflow)?;
        Rational::new(num, denom).map(|r| r.reduced())
    }

    /// `self - other`; fails rather than going negative.
    pub fn checked_sub(&self, other: &Rational) -> Result<Rational> {
        let (a, b) = (self.reduced(), other.reduced());
        let denom = a.denom.checked_mul(b.denom).ok_or(Error::MathOverflow)?;
        let l = a.num.checked_mul(b.denom).ok_or(Error::MathOverflow)?;
        let r = b.num.checked_mul(a.denom).ok_or(Error::MathOverflow)?;
        let num = l.checked_sub(r).ok_or(Error::MathOverflow)?;
        Rational::new(num, denom).map(|r| r.reduced())
    }

    /// `self * k` as a fraction.
    pub fn checked_mul_int(&self, k: u64) -> Result<Rational> {
        let r = self.reduced();
        let num = r.num.checked_mul(k.into()).ok_or(Error::MathOverflow)?;
        Rational::new(num, r.denom)
    }

    /// `floor(value * self)`.
    pub fn floor_mul(&self, value: u64) -> Result<u64> {
        if self.denom == 0 {
            return Err(Error::MathOverflow);
        }
        let product = U512::from(value) * U512::from(self.num);
        wide_to_u64(product / U512::from(self.denom))
    }

    /// `ceil(value * self)`.
    pub fn ceil_mul(&self, value: u64) -> Result<u64> {
        let product = U512::from(value) * U512::from(self.num);
        wide_to_u64(wide_ceil_div(product, U512::from(self.denom))?)
    }

    /// Numerator and denominator as wide integers.
    pub(crate) fn wide(&self) -> (U512, U512) {
        (U512::from(self.num), U512::from(self.denom))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    /// Cross-multiplied in 512 bits, so it never overflows.
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = U512::from(self.num) * U512::from(other.denom);
        let rhs = U512::from(other.num) * U512::from(self.denom);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.denom)
    }
}
