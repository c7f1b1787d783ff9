//! Loyalty-token accrual for settled payments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::amount::{parse_fixed, Amount, UNIT};
use crate::error::FacepayError;

/// Loyalty tokens earned per whole currency unit, with 6 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RewardRate(u64);

impl RewardRate {
    /// One token per unit spent.
    pub const ONE: RewardRate = RewardRate(UNIT);

    pub fn parse(input: &str) -> Result<Self, FacepayError> {
        parse_fixed(input)
            .map(Self)
            .map_err(|e| FacepayError::ConfigError(format!("invalid reward rate: {e}")))
    }
}

impl Default for RewardRate {
    fn default() -> Self {
        Self::ONE
    }
}

impl FromStr for RewardRate {
    type Err = FacepayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RewardRate {
    type Error = FacepayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RewardRate> for String {
    fn from(r: RewardRate) -> Self {
        r.to_string()
    }
}

impl fmt::Display for RewardRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Amount::from_units(self.0).fmt(f)
    }
}

/// `floor(amount * rate)` in whole loyalty tokens.
pub fn reward(amount: Amount, rate: RewardRate) -> u64 {
    let product = u128::from(amount.units()) * u128::from(rate.0);
    let whole = product / (u128::from(UNIT) * u128::from(UNIT));
    u64::try_from(whole).unwrap_or(u64::MAX)
}
