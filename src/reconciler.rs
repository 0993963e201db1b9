//! Subscription state reconciliation.
//!
//! Pure core: given a user's current subscription record (or none), a
//! payment, the monthly price, and an explicit "now", compute the next
//! record and whether the payment should be marked consumed. Persisting the
//! result is the store's job; see [`crate::store`] for the atomic-commit
//! contract.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{ReconcileError, Result};
use crate::models::{Payment, PaymentStatus, SubscriptionRecord, SubscriptionStatus};
use crate::proration;

/// Next subscription state computed from one payment.
///
/// `next` and the payment's `consumed` flag must be committed together;
/// partial application is the hazard the commit contract prevents.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Subscription record after applying the payment.
    pub next: SubscriptionRecord,
    /// Whole months credited.
    pub months_granted: u32,
    /// Leftover amount below one month's price.
    pub remainder: Decimal,
    /// Whether the payment should be marked consumed in the same commit.
    ///
    /// False when the payment granted zero months: no value was applied, so
    /// the payment stays eligible for manual review instead of being
    /// silently discarded.
    pub mark_consumed: bool,
}

/// Reconciles one payment against a user's current subscription state.
///
/// An absent `current` record is treated as a freshly-initialized default
/// (inactive, no expiry, unverified); the returned record then creates it.
///
/// The extension base date is the existing expiry when the subscription is
/// still valid at `now` (extensions stack on remaining time), and `now`
/// when the record is inactive, has no expiry, or has lapsed.
///
/// # Errors
///
/// - [`ReconcileError::InvalidPaymentState`] if the payment is not in
///   `success` status.
/// - [`ReconcileError::AlreadyConsumed`] if the payment was already applied
///   (idempotency guard); the record is unchanged.
/// - [`ReconcileError::ConfigurationError`] if `monthly_price` is invalid.
pub fn reconcile(
    current: Option<&SubscriptionRecord>,
    payment: &Payment,
    monthly_price: Decimal,
    now: DateTime<Utc>,
) -> Result<Reconciliation> {
    if payment.status != PaymentStatus::Success {
        return Err(ReconcileError::InvalidPaymentState(format!(
            "payment {} has status {}, expected success",
            payment.id, payment.status
        )));
    }
    if payment.consumed {
        return Err(ReconcileError::AlreadyConsumed(payment.id.clone()));
    }

    let prorated = proration::compute(payment.amount, monthly_price)?;

    let record = current
        .cloned()
        .unwrap_or_else(|| SubscriptionRecord::inactive(payment.user_id.clone()));

    if prorated.months_granted == 0 {
        // No credit applied; stored fields stay as they are, but the record
        // is still created for users reconciled for the first time.
        return Ok(Reconciliation {
            next: record,
            months_granted: 0,
            remainder: prorated.remainder,
            mark_consumed: false,
        });
    }

    let base = record.extension_base(now);
    let expires_at = proration::add_calendar_months(base, prorated.months_granted)?;

    let next = SubscriptionRecord {
        user_id: record.user_id,
        status: SubscriptionStatus::Active,
        expires_at: Some(expires_at),
        verified: true,
    };

    Ok(Reconciliation {
        next,
        months_granted: prorated.months_granted,
        remainder: prorated.remainder,
        mark_consumed: true,
    })
}
