//! Fee model and payment breakdown
//!
//! A platform fee is charged per seat to both sides: the passenger pays it on
//! top of the fare, and the driver has it deducted from the fare. What the
//! driver earns is split into an advance (paid at trip start) and a vault
//! (held until completion). All arithmetic is in minor units, so
//! `total_collected == platform_commission + driver_advance + vault_amount`
//! holds exactly.

use serde::{Deserialize, Serialize};

use super::{Money, PaymentError};
use crate::config::PaymentConfig;

/// Escrow state of the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    /// Held
    Locked,
    /// Paid to the driver; set exactly once
    Released,
}

/// Fee parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Fee per seat charged to each side
    pub platform_fee_per_seat: Money,
    /// Share of driver earnings paid as the advance
    pub driver_advance_percent: u8,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::from_config(&PaymentConfig::default())
    }
}

impl FeeSchedule {
    /// Build from payment configuration
    #[must_use]
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            platform_fee_per_seat: config.platform_fee_per_seat,
            driver_advance_percent: config.driver_advance_percent,
        }
    }
}

/// How a trip's money is split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBreakdown {
    /// Fare per seat, before fees
    pub fare_per_seat: Money,
    /// Seats sold
    pub seats: u32,
    /// Everything passengers pay
    pub total_collected: Money,
    /// Driver fee plus passenger fee
    pub platform_commission: Money,
    /// Fee deducted from the driver's side
    pub driver_fee: Money,
    /// Fee added on the passenger's side
    pub passenger_fee: Money,
    /// Paid to the driver at trip start
    pub driver_advance: Money,
    /// Held until completion
    pub vault_amount: Money,
    /// Escrow state
    pub vault_status: VaultStatus,
}

impl PaymentBreakdown {
    /// Driver's share: advance plus vault
    #[must_use]
    pub fn driver_earnings(&self) -> Money {
        self.driver_advance + self.vault_amount
    }

    /// Largest total refund the trip allows; platform fees are non-refundable
    #[must_use]
    pub fn max_refundable(&self) -> Money {
        self.total_collected - self.platform_commission
    }
}

/// Parse a fare from user input
///
/// # Errors
///
/// [`PaymentError::InvalidFare`] for anything that is not a decimal amount,
/// [`PaymentError::NegativeFare`] below zero.
pub fn parse_fare(input: &str) -> Result<Money, PaymentError> {
    let fare: Money = input.parse().map_err(|e| PaymentError::InvalidFare {
        reason: format!("{e}"),
    })?;
    if fare.is_negative() {
        return Err(PaymentError::NegativeFare { fare });
    }
    Ok(fare)
}

/// Split `fare_per_seat × seats` according to `fees`
///
/// The driver fee is capped at the fare so driver earnings never go negative.
///
/// # Errors
///
/// [`PaymentError::NegativeFare`] for a negative fare,
/// [`PaymentError::InvalidFare`] when the totals overflow or the advance
/// share is above 100%.
pub fn calculate_payment_breakdown(
    fare_per_seat: Money,
    seats: u32,
    fees: &FeeSchedule,
) -> Result<PaymentBreakdown, PaymentError> {
    if fare_per_seat.is_negative() {
        return Err(PaymentError::NegativeFare {
            fare: fare_per_seat,
        });
    }
    let overflow = || PaymentError::InvalidFare {
        reason: format!("{fare_per_seat} x {seats} seats is out of range"),
    };

    let fee = fees.platform_fee_per_seat;
    let gross_fare = fare_per_seat.checked_mul(seats).ok_or_else(overflow)?;
    let passenger_fee = fee.checked_mul(seats).ok_or_else(overflow)?;
    let driver_fee = fee.min(fare_per_seat).checked_mul(seats).ok_or_else(overflow)?;
    let total_collected = gross_fare.checked_add(passenger_fee).ok_or_else(overflow)?;
    let platform_commission = driver_fee.checked_add(passenger_fee).ok_or_else(overflow)?;

    let driver_earnings = gross_fare - driver_fee;
    if fees.driver_advance_percent > 100 {
        return Err(PaymentError::InvalidFare {
            reason: format!(
                "driver advance of {}% exceeds driver earnings",
                fees.driver_advance_percent
            ),
        });
    }
    let driver_advance = driver_earnings
        .percent(fees.driver_advance_percent)
        .ok_or_else(overflow)?;
    let vault_amount = driver_earnings - driver_advance;

    Ok(PaymentBreakdown {
        fare_per_seat,
        seats,
        total_collected,
        platform_commission,
        driver_fee,
        passenger_fee,
        driver_advance,
        vault_amount,
        vault_status: VaultStatus::Locked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fees() -> FeeSchedule {
        FeeSchedule {
            platform_fee_per_seat: Money::from_major(10),
            driver_advance_percent: 70,
        }
    }

    #[test]
    fn splits_a_typical_fare() {
        // GIVEN: 250.00 per seat, 3 seats, 10.00 fee per seat per side
        // WHEN: computing the breakdown
        let b = calculate_payment_breakdown(Money::from_major(250), 3, &fees()).unwrap();

        // THEN: passengers pay 780, platform keeps 60, driver earns 720 (504 + 216)
        assert_eq!(b.total_collected, Money::from_major(780));
        assert_eq!(b.platform_commission, Money::from_major(60));
        assert_eq!(b.driver_advance, Money::from_major(504));
        assert_eq!(b.vault_amount, Money::from_major(216));
        assert_eq!(b.vault_status, VaultStatus::Locked);
        assert_eq!(b.max_refundable(), Money::from_major(720));
    }

    #[test]
    fn invariant_holds_across_fares_and_seats() {
        let schedules = [
            fees(),
            FeeSchedule {
                platform_fee_per_seat: Money::from_minor(333),
                driver_advance_percent: 70,
            },
            FeeSchedule {
                platform_fee_per_seat: Money::ZERO,
                driver_advance_percent: 100,
            },
        ];
        for fees in &schedules {
            for fare in (0..5_000).step_by(37).chain([1, 9_999, 1_000_001]) {
                for seats in 0..=8 {
                    let b = calculate_payment_breakdown(Money::from_minor(fare), seats, fees)
                        .unwrap();
                    assert_eq!(
                        b.total_collected,
                        b.platform_commission + b.driver_advance + b.vault_amount,
                        "fare={fare} seats={seats}"
                    );
                    assert!(!b.driver_advance.is_negative());
                    assert!(!b.vault_amount.is_negative());
                }
            }
        }
    }

    #[test]
    fn driver_fee_is_capped_at_fare() {
        // A fare below the platform fee leaves the driver with nothing, not a debt
        let b = calculate_payment_breakdown(Money::from_major(4), 2, &fees()).unwrap();
        assert_eq!(b.driver_fee, Money::from_major(8));
        assert_eq!(b.driver_earnings(), Money::ZERO);
        assert_eq!(b.total_collected, Money::from_major(28));
    }

    #[test]
    fn zero_seats_is_all_zero() {
        let b = calculate_payment_breakdown(Money::from_major(100), 0, &fees()).unwrap();
        assert_eq!(b.total_collected, Money::ZERO);
        assert_eq!(b.platform_commission, Money::ZERO);
    }

    #[test]
    fn rejects_negative_fare() {
        let err = calculate_payment_breakdown(Money::from_minor(-1), 1, &fees()).unwrap_err();
        assert_eq!(err.code(), "NEGATIVE_FARE_NOT_ALLOWED");
    }

    #[test]
    fn rejects_overflowing_totals() {
        let err = calculate_payment_breakdown(Money::from_minor(i64::MAX), 2, &fees()).unwrap_err();
        assert_eq!(err.code(), "INVALID_FARE");

        // Gross fare fits, but the advance split does not
        let err = calculate_payment_breakdown(
            Money::from_minor(100_000_000_000_000_000),
            50,
            &FeeSchedule::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_FARE");
    }

    #[test]
    fn rejects_advance_above_driver_earnings() {
        let fees = FeeSchedule {
            platform_fee_per_seat: Money::from_major(10),
            driver_advance_percent: 120,
        };
        let err = calculate_payment_breakdown(Money::from_major(100), 1, &fees).unwrap_err();
        assert_eq!(err.code(), "INVALID_FARE");
    }

    #[test]
    fn parse_fare_rejects_non_numeric_and_negative_input() {
        assert_eq!(parse_fare("120.50").unwrap(), Money::from_minor(12_050));
        assert_eq!(parse_fare("abc").unwrap_err().code(), "INVALID_FARE");
        assert_eq!(parse_fare("NaN").unwrap_err().code(), "INVALID_FARE");
        assert_eq!(parse_fare("-5").unwrap_err().code(), "NEGATIVE_FARE_NOT_ALLOWED");
    }
}
