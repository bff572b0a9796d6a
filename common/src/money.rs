// Fixed-point money. No binary floating point anywhere near a balance —
// `rust_decimal::Decimal` gives us exact add/sub/mul and explicit rounding
// strategies, which is what §3 of the spec requires ("precision >= 18,
// scale sufficient for USDC's 6 decimals and USD cents").

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usdc,
    Usd,
}

impl Currency {
    /// Number of decimal places money in this currency is rounded to.
    pub fn scale(self) -> u32 {
        match self {
            Currency::Usdc => 6,
            Currency::Usd => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Usdc => write!(f, "USDC"),
            Currency::Usd => write!(f, "USD"),
        }
    }
}

/// A monetary amount. Always non-negative by construction at the call sites
/// that matter (ledger balances, entry amounts) — the newtype itself does
/// not forbid negative values because signed intermediate math (e.g.
/// spending_amount = total - stash_amount) is legitimate before the result
/// is checked against an invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Money(value)
    }

    pub fn from_str(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(s.parse()?))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round half-to-even at the given currency's scale. This is the
    /// rounding convention chosen for allocation splits (§9 open question:
    /// half-up vs half-even — half-even was picked to make conservation
    /// exact across repeated small deposits rather than drifting up).
    pub fn round_to_currency_scale(self, currency: Currency) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(currency.scale(), RoundingStrategy::MidpointNearestEven),
        )
    }

    /// Multiply by a ratio (e.g. 0.30) and round to the currency's scale.
    pub fn mul_ratio_rounded(self, ratio: Decimal, currency: Currency) -> Self {
        Money(self.0 * ratio).round_to_currency_scale(currency)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn m(s: &str) -> Money {
        Money::new(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn dust_preserving_split() {
        // 0.01 USDC split at 0.7/0.3 must not lose the cent: half-even
        // rounds stash down to 0.00, spending gets the whole 0.01.
        let total = m("0.01");
        let ratio_stash = Decimal::from_str("0.3").unwrap();
        let stash = total.mul_ratio_rounded(ratio_stash, Currency::Usdc);
        let spending = total - stash;
        assert_eq!(stash, m("0.0"));
        assert_eq!(spending, m("0.01"));
        assert_eq!(stash + spending, total);
    }

    #[test]
    fn happy_path_split_is_exact() {
        let total = m("100.00");
        let ratio_stash = Decimal::from_str("0.3").unwrap();
        let stash = total.mul_ratio_rounded(ratio_stash, Currency::Usd);
        let spending = total - stash;
        assert_eq!(stash, m("30.00"));
        assert_eq!(spending, m("70.00"));
    }

    #[test]
    fn currency_scale_round_trip() {
        assert_eq!(Currency::Usd.scale(), 2);
        assert_eq!(Currency::Usdc.scale(), 6);
    }
}
