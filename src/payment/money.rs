//! Integer money amounts
//!
//! Amounts are held in minor units (paise) so that every split of a fare adds
//! back up exactly.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minor units per major unit
pub const MINOR_PER_MAJOR: i64 = 100;

/// Amount in minor currency units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

/// Why a value could not be turned into [`Money`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Not a finite number
    #[error("Not a valid amount: {0}")]
    NotANumber(String),
    /// Outside the representable range
    #[error("Amount out of range: {0}")]
    Overflow(String),
}

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// From minor units
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// From whole major units
    #[must_use]
    pub const fn from_major(major: i64) -> Self {
        Self(major * MINOR_PER_MAJOR)
    }

    /// From a floating point major amount, rounded to the nearest minor unit
    ///
    /// # Errors
    ///
    /// [`MoneyError::NotANumber`] for NaN or infinity, [`MoneyError::Overflow`]
    /// when the value does not fit.
    pub fn try_from_major_f64(major: f64) -> Result<Self, MoneyError> {
        if !major.is_finite() {
            return Err(MoneyError::NotANumber(major.to_string()));
        }
        let minor = (major * 100.0).round();
        #[allow(clippy::cast_precision_loss)]
        if minor > i64::MAX as f64 || minor < i64::MIN as f64 {
            return Err(MoneyError::Overflow(major.to_string()));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self(minor as i64))
    }

    /// Value in minor units
    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// `true` below zero
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `true` above zero
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Multiply by a seat count
    #[must_use]
    pub fn checked_mul(self, n: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(n)).map(Self)
    }

    /// Checked addition
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// `percent`% of the amount, rounded down to a minor unit; `None` on
    /// overflow
    #[must_use]
    pub fn percent(self, percent: u8) -> Option<Self> {
        self.0.checked_mul(i64::from(percent)).map(|v| Self(v / 100))
    }

    /// `bps` basis points of the amount, rounded down to a minor unit; `None`
    /// on overflow
    #[must_use]
    pub fn basis_points(self, bps: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(bps)).map(|v| Self(v / 10_000))
    }

    /// The smaller of two amounts
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_PER_MAJOR.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / per, abs % per)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    /// Parse "120", "120.5" or "-3.25" (at most two decimals)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || MoneyError::NotANumber(s.to_string());
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty()
            || frac.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| MoneyError::Overflow(s.to_string()))?
        };
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let minor = whole
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| MoneyError::Overflow(s.to_string()))?;
        Ok(Self(if negative { -minor } else { minor }))
    }
}
