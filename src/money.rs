//! Money representation and chat-amount parsing.
//!
//! All balances, fees and transaction amounts are integer **kobo**
//! (1 naira = 100 kobo) carried as `i64`. No floating point anywhere
//! near money; all arithmetic is checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kobo per naira.
pub const KOBO_PER_NAIRA: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),
}

/// An amount of money in kobo.
///
/// Newtype over `i64` so raw integers cannot be confused with amounts.
/// Stored amounts are always non-negative; sign is carried by the
/// transaction direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Construct from kobo. Negative input is rejected.
    pub fn from_kobo(kobo: i64) -> Result<Self, MoneyError> {
        if kobo < 0 {
            return Err(MoneyError::InvalidAmount);
        }
        Ok(Amount(kobo))
    }

    /// Construct from whole naira.
    pub fn from_naira(naira: i64) -> Result<Self, MoneyError> {
        if naira < 0 {
            return Err(MoneyError::InvalidAmount);
        }
        naira
            .checked_mul(KOBO_PER_NAIRA)
            .map(Amount)
            .ok_or(MoneyError::Overflow)
    }

    #[inline]
    pub fn kobo(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, MoneyError> {
        let v = self.0.checked_sub(other.0).ok_or(MoneyError::Overflow)?;
        if v < 0 {
            return Err(MoneyError::InvalidAmount);
        }
        Ok(Amount(v))
    }

    /// Percentage with kobo precision: `amount * percent / 100`.
    ///
    /// Uses i128 intermediate to prevent overflow. Rounds down, with a
    /// 1-kobo minimum when both operands are non-zero (a fee must never
    /// round to free).
    pub fn percent(self, percent: u32) -> Amount {
        let v = (self.0 as i128 * percent as i128) / 100;
        if v == 0 && self.0 > 0 && percent > 0 {
            Amount(1)
        } else {
            Amount(v as i64)
        }
    }
}

impl fmt::Display for Amount {
    /// Formats as naira with two decimal places and thousands separators,
    /// e.g. `₦5,000.00`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let naira = self.0 / KOBO_PER_NAIRA;
        let kobo = (self.0 % KOBO_PER_NAIRA).abs();
        let mut whole = naira.to_string();
        let mut grouped = String::new();
        while whole.len() > 3 {
            let tail = whole.split_off(whole.len() - 3);
            grouped = if grouped.is_empty() {
                tail
            } else {
                format!("{},{}", tail, grouped)
            };
        }
        if grouped.is_empty() {
            write!(f, "₦{}.{:02}", whole, kobo)
        } else {
            write!(f, "₦{},{}.{:02}", whole, grouped, kobo)
        }
    }
}

/// Parse a chat-style amount into kobo.
///
/// Accepts the forms users actually type:
/// - `5000`, `5,000`, `5000.50`
/// - `₦5000`, `N5000`, `NGN 5000`, `naira` suffix
/// - shorthand: `5k` → 5,000 naira, `1.5k` → 1,500, `50k` → 50,000
pub fn parse_amount(input: &str) -> Result<Amount, MoneyError> {
    let mut s = input.trim().to_lowercase();
    for prefix in ["₦", "ngn", "n"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start().to_string();
            break;
        }
    }
    if let Some(rest) = s.strip_suffix("naira") {
        s = rest.trim_end().to_string();
    }
    s.retain(|c| c != ',');

    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('-') || s.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    // Thousands shorthand multiplies the parsed value by 1000.
    let (s, multiplier) = match s.strip_suffix('k') {
        Some(rest) => (rest.trim_end().to_string(), 1000i64),
        None => (s, 1i64),
    };

    let parts: Vec<&str> = s.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => (parts[0], parts[1]),
        _ => return Err(MoneyError::InvalidFormat(input.trim().to_string())),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(input.trim().to_string()));
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(input.trim().to_string()));
    }

    // Normalize the fraction to kobo precision. More than 2 decimal places
    // is only allowed with the `k` shorthand (e.g. "1.555k" = ₦1,555).
    let max_frac = if multiplier == 1000 { 5 } else { 2 };
    if frac.len() > max_frac {
        return Err(MoneyError::InvalidFormat(
            "too many decimal places".to_string(),
        ));
    }

    let whole_val: i64 = whole
        .parse()
        .map_err(|_| MoneyError::Overflow)?;

    // frac_val scaled so that whole.frac * multiplier lands on exact kobo
    let scale = 10i64.pow(frac.len() as u32);
    let frac_val: i64 = if frac.is_empty() {
        0
    } else {
        frac.parse().map_err(|_| MoneyError::Overflow)?
    };

    // kobo = (whole + frac/scale) * multiplier * 100
    let numer = (whole_val as i128 * scale as i128 + frac_val as i128)
        * multiplier as i128
        * KOBO_PER_NAIRA as i128;
    if numer % scale as i128 != 0 {
        return Err(MoneyError::InvalidFormat(
            "amount is not a whole number of kobo".to_string(),
        ));
    }
    let kobo = numer / scale as i128;
    if kobo <= 0 {
        return Err(MoneyError::InvalidAmount);
    }
    if kobo > i64::MAX as i128 {
        return Err(MoneyError::Overflow);
    }

    Ok(Amount(kobo as i64))
}
