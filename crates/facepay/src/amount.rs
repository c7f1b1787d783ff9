//! Fixed-point money values.
//!
//! Amounts are held as integer micro-units (6 decimal places, the precision of
//! USDC). Parsing splits on the decimal point and works on the integer parts;
//! there is no f64 in the pipeline except at the explicit [`TryFrom<f64>`]
//! boundary, which goes through a decimal string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FacepayError;

/// Decimal places carried by [`Amount`].
pub const AMOUNT_DECIMALS: u32 = 6;

/// Micro-units per whole unit.
pub const UNIT: u64 = 10u64.pow(AMOUNT_DECIMALS);

/// A non-negative decimal value with 6 places of precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u64) -> Self {
        Self(units)
    }

    pub fn from_whole(whole: u64) -> Result<Self, FacepayError> {
        whole
            .checked_mul(UNIT)
            .map(Self)
            .ok_or_else(|| FacepayError::InvalidAmount(format!("{whole} overflows")))
    }

    /// Raw micro-units.
    pub fn units(&self) -> u64 {
        self.0
    }

    /// Integer part, rounded down.
    pub fn whole(&self) -> u64 {
        self.0 / UNIT
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"25"`, `"25.00"`, `"$0.015"`.
    ///
    /// More than [`AMOUNT_DECIMALS`] fractional digits is an error rather than
    /// a silent truncation: an amount the customer saw must be the amount charged.
    pub fn parse(input: &str) -> Result<Self, FacepayError> {
        parse_fixed(input).map(Self)
    }
}

impl FromStr for Amount {
    type Err = FacepayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Amount {
    type Error = FacepayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> Self {
        a.to_string()
    }
}

impl TryFrom<f64> for Amount {
    type Error = FacepayError;

    /// Operator-entered floats are rounded to 6 places; NaN, infinities and
    /// negatives are rejected.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(FacepayError::InvalidAmount(format!(
                "{value} is not a finite number"
            )));
        }
        if value < 0.0 {
            return Err(FacepayError::InvalidAmount(format!("{value} is negative")));
        }
        Self::parse(&format!("{value:.6}"))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{frac:06}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Parse a non-negative decimal into micro-units without floating point.
pub(crate) fn parse_fixed(input: &str) -> Result<u64, FacepayError> {
    let trimmed = input.trim();
    let cleaned = trimmed.strip_prefix('$').unwrap_or(trimmed);

    if cleaned.is_empty() {
        return Err(FacepayError::InvalidAmount(format!(
            "'{input}': no numeric content"
        )));
    }
    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(FacepayError::InvalidAmount(format!(
            "'{input}': only digits and one decimal point are allowed"
        )));
    }

    let (integer_part, fractional_part) = match cleaned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (cleaned, ""),
    };
    if fractional_part.contains('.') {
        return Err(FacepayError::InvalidAmount(format!(
            "'{input}': more than one decimal point"
        )));
    }
    if integer_part.is_empty() && fractional_part.is_empty() {
        return Err(FacepayError::InvalidAmount(format!(
            "'{input}': no numeric content"
        )));
    }

    let decimals = AMOUNT_DECIMALS as usize;
    if fractional_part.len() > decimals {
        return Err(FacepayError::InvalidAmount(format!(
            "'{input}': more than {decimals} decimal places"
        )));
    }

    let integer: u64 = if integer_part.is_empty() {
        0
    } else {
        integer_part
            .parse()
            .map_err(|e| FacepayError::InvalidAmount(format!("'{input}': integer part: {e}")))?
    };
    let fractional: u64 = if fractional_part.is_empty() {
        0
    } else {
        let scale = 10u64.pow((decimals - fractional_part.len()) as u32);
        fractional_part
            .parse::<u64>()
            .map_err(|e| FacepayError::InvalidAmount(format!("'{input}': fractional part: {e}")))?
            * scale
    };

    integer
        .checked_mul(UNIT)
        .and_then(|v| v.checked_add(fractional))
        .ok_or_else(|| FacepayError::InvalidAmount(format!("'{input}': overflows")))
}

/// Currencies a terminal can charge in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usdc,
    Sui,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Usdc => "USDC",
            Self::Sui => "SUI",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Currency {
    type Err = FacepayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usdc" => Ok(Self::Usdc),
            "sui" => Ok(Self::Sui),
            other => Err(FacepayError::ConfigError(format!(
                "unsupported currency '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amounts() {
        assert_eq!(Amount::parse("25").unwrap().units(), 25_000_000);
        assert_eq!(Amount::parse("25.00").unwrap().units(), 25_000_000);
        assert_eq!(Amount::parse("$0.01").unwrap().units(), 10_000);
        assert_eq!(Amount::parse("123.40").unwrap().units(), 123_400_000);
        assert_eq!(Amount::parse(".5").unwrap().units(), 500_000);
        assert_eq!(Amount::parse("0").unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "$", ".", "-1", "1.2.3", "abc", "1e5", "0.0000001", "1,000"] {
            assert!(
                matches!(Amount::parse(bad), Err(FacepayError::InvalidAmount(_))),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(Amount::parse("18446744073709551615").is_err());
    }

    #[test]
    fn test_from_f64_boundary() {
        assert_eq!(Amount::try_from(25.0).unwrap().units(), 25_000_000);
        assert_eq!(Amount::try_from(0.1).unwrap().units(), 100_000);
        assert!(Amount::try_from(f64::NAN).is_err());
        assert!(Amount::try_from(f64::INFINITY).is_err());
        assert!(Amount::try_from(-3.0).is_err());
    }

    #[test]
    fn test_display_trims_zeros() {
        assert_eq!(Amount::parse("25.00").unwrap().to_string(), "25");
        assert_eq!(Amount::parse("123.40").unwrap().to_string(), "123.4");
        assert_eq!(Amount::parse("0.000001").unwrap().to_string(), "0.000001");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Amount::parse("1.5").unwrap()).unwrap();
        assert_eq!(json, "\"1.5\"");
        let back: Amount = serde_json::from_str("\"2.25\"").unwrap();
        assert_eq!(back.units(), 2_250_000);
        assert!(serde_json::from_str::<Amount>("\"-2\"").is_err());
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("USDC".parse::<Currency>().unwrap(), Currency::Usdc);
        assert_eq!(" sui ".parse::<Currency>().unwrap(), Currency::Sui);
        assert!("eth".parse::<Currency>().is_err());
    }
}
