//! Data model for payments and subscription records.
//!
//! These are the plain tagged records exchanged with the external
//! data-access collaborator. The reconciler is the only writer of
//! [`SubscriptionRecord`]; the `consumed` flag on [`Payment`] is owned
//! exclusively by the store's commit step.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

fn validate_id(id: &str, what: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err(format!("{what} cannot be empty"));
    }
    if id.len() > 64 {
        return Err(format!("{what} must be 64 characters or less"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(format!(
            "{what} can only contain alphanumeric characters, hyphens, and underscores"
        ));
    }
    Ok(())
}

/// Unique identifier for a user owning payments and a subscription record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a new user ID after validation.
    ///
    /// # Errors
    ///
    /// Returns error if the ID is empty, exceeds 64 characters, or contains
    /// characters other than alphanumerics, hyphens, and underscores.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id(&id, "user_id").map_err(ReconcileError::InvalidUserId)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a payment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaymentId(String);

impl PaymentId {
    /// Creates a new payment ID after validation.
    ///
    /// # Errors
    ///
    /// Returns error if the ID is empty, exceeds 64 characters, or contains
    /// characters other than alphanumerics, hyphens, and underscores.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id(&id, "payment_id").map_err(ReconcileError::InvalidPaymentId)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settlement status of a payment, set by the external payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Payment initiated but not yet settled.
    Pending,
    /// Payment settled successfully.
    Success,
    /// Payment failed or was rejected.
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A payment received from the external payment processor.
///
/// The reconciler reads every field and writes exactly one: `consumed`,
/// which transitions false→true once the payment's value has been applied
/// to the owner's subscription, and never reverses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier.
    pub id: PaymentId,
    /// Owning user.
    pub user_id: UserId,
    /// Monetary amount paid, in plan currency units.
    pub amount: Decimal,
    /// Settlement status.
    pub status: PaymentStatus,
    /// Whether this payment has been applied to a subscription.
    pub consumed: bool,
    /// When the payment was made.
    pub paid_at: DateTime<Utc>,
    /// Unique transaction reference from the payment gateway.
    pub tx_ref: String,
}

/// Subscription status stored on a record.
///
/// `Expired` is a read-time classification: the reconciler never writes it.
/// Use [`SubscriptionRecord::status_at`] to derive the effective status at
/// an observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Never subscribed, or subscription explicitly deactivated.
    Inactive,
    /// Subscription paid up (whether expiry has since passed is derived).
    Active,
    /// Derived classification for an active record whose expiry has passed.
    Expired,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Per-user subscription state, at most one live instance per user.
///
/// Created lazily on first reconciliation with [`SubscriptionRecord::inactive`]
/// defaults; never deleted by this crate.
///
/// Invariant: `verified` implies the record was active with a future expiry
/// at the time of setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Owning user.
    pub user_id: UserId,
    /// Stored status. Read through [`status_at`](Self::status_at).
    pub status: SubscriptionStatus,
    /// Expiry timestamp, absent until the first paid extension.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the user has been verified by a paid subscription.
    pub verified: bool,
}

impl SubscriptionRecord {
    /// Returns the default record for a user with no subscription history.
    #[must_use]
    pub fn inactive(user_id: UserId) -> Self {
        Self { user_id, status: SubscriptionStatus::Inactive, expires_at: None, verified: false }
    }

    /// Derives the effective status at `now`.
    ///
    /// A stored `Active` whose expiry is at or before `now` reads as
    /// `Expired`; everything else reads as stored.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.status {
            SubscriptionStatus::Active
                if self.expires_at.is_some_and(|expiry| expiry <= now) =>
            {
                SubscriptionStatus::Expired
            }
            other => other,
        }
    }

    /// Whether the subscription has lapsed at `now`.
    ///
    /// Lapsed means inactive, no expiry on record, or expiry at or before
    /// `now`. A lapsed subscription's next extension starts from `now`
    /// rather than stacking on the stored expiry.
    #[must_use]
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        !(self.status == SubscriptionStatus::Active
            && self.expires_at.is_some_and(|expiry| expiry > now))
    }

    /// Returns the base date for a subscription-time extension at `now`.
    ///
    /// Extensions stack on the remaining time of a still-valid subscription;
    /// a lapsed one restarts from `now`.
    #[must_use]
    pub fn extension_base(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_lapsed(now) {
            now
        } else {
            // is_lapsed guarantees a future expiry here
            self.expires_at.unwrap_or(now)
        }
    }
}

/// Result of applying one payment to one subscription record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    /// User whose subscription was reconciled.
    pub user_id: UserId,
    /// Payment that triggered the reconciliation.
    pub payment_id: PaymentId,
    /// Whole months credited by this payment.
    pub months_granted: u32,
    /// Leftover amount below one month's price.
    pub remainder: Decimal,
    /// Subscription status after reconciliation.
    pub new_status: SubscriptionStatus,
    /// Expiry after reconciliation.
    pub new_expires_at: Option<DateTime<Utc>>,
    /// Verified flag after reconciliation.
    pub verified: bool,
    /// Whether this invocation marked the payment consumed.
    pub consumed_now: bool,
}
