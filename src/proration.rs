//! Proration calculation utilities.
//!
//! Converts a monetary payment amount into whole subscription months plus a
//! leftover amount, and adds calendar months to expiry dates. All monetary
//! arithmetic is exact decimal; no binary floating point is involved.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{ReconcileError, Result};

/// Whole months granted by a payment plus the leftover amount.
///
/// Ephemeral: computed per payment, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProrationResult {
    /// Whole months of subscription time granted.
    pub months_granted: u32,
    /// Leftover amount below one month's price. Always in `[0, monthly_price)`.
    pub remainder: Decimal,
}

/// Converts an amount paid into whole months granted plus remainder.
///
/// `months_granted = floor(amount_paid / monthly_price)`;
/// `remainder = amount_paid - months_granted * monthly_price`.
///
/// A zero or negative `amount_paid` is tolerated as defensive input and
/// yields zero months with zero remainder; the caller decides how to report
/// it. Pure and referentially transparent.
///
/// # Errors
///
/// Returns [`ReconcileError::ConfigurationError`] if `monthly_price` is not
/// positive, if the computed month count does not fit in `u32`, or if the
/// intermediate arithmetic overflows `Decimal`.
///
/// # Examples
///
/// ```
/// use rust_decimal::Decimal;
/// use subscription_reconciler::proration::compute;
///
/// # fn example() -> subscription_reconciler::error::Result<()> {
/// let result = compute(Decimal::new(1700, 0), Decimal::new(500, 0))?;
/// assert_eq!(result.months_granted, 3);
/// assert_eq!(result.remainder, Decimal::new(200, 0));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn compute(amount_paid: Decimal, monthly_price: Decimal) -> Result<ProrationResult> {
    if monthly_price <= Decimal::ZERO {
        return Err(ReconcileError::ConfigurationError(format!(
            "monthly price must be positive, got {monthly_price}"
        )));
    }
    if amount_paid <= Decimal::ZERO {
        return Ok(ProrationResult { months_granted: 0, remainder: Decimal::ZERO });
    }

    let months = amount_paid
        .checked_div(monthly_price)
        .ok_or_else(|| {
            ReconcileError::ConfigurationError(format!(
                "proration of {amount_paid} at price {monthly_price} overflows"
            ))
        })?
        .floor();
    let months_granted = months.to_u32().ok_or_else(|| {
        ReconcileError::ConfigurationError(format!("months granted out of range: {months}"))
    })?;
    let credited = months.checked_mul(monthly_price).ok_or_else(|| {
        ReconcileError::ConfigurationError(format!(
            "proration of {amount_paid} at price {monthly_price} overflows"
        ))
    })?;
    let remainder = amount_paid - credited;

    Ok(ProrationResult { months_granted, remainder })
}

/// Adds `months` calendar months to `base`, clamping the day of month.
///
/// Day-of-month overflow at month boundaries is clamped to the last valid
/// day of the resulting month: Jan 31 + 1 month is Feb 28 (29 in leap
/// years).
///
/// # Errors
///
/// Returns [`ReconcileError::ConfigurationError`] if the result falls
/// outside the representable date range.
pub fn add_calendar_months(base: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    base.checked_add_months(Months::new(months)).ok_or_else(|| {
        ReconcileError::ConfigurationError(format!(
            "expiry {months} months after {base} is out of range"
        ))
    })
}
