//! Error types for subscription reconciliation.
//!
//! All errors implement the standard [`std::error::Error`] trait via
//! [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Payment guards** ([`ReconcileError::InvalidPaymentState`],
//!   [`ReconcileError::AlreadyConsumed`]): a payment is not eligible for
//!   application
//! - **Configuration** ([`ReconcileError::ConfigurationError`]): invalid
//!   monthly price or other precondition violation
//! - **Commit races** ([`ReconcileError::PersistenceConflict`]): a concurrent
//!   reconciliation won the atomic commit
//! - **Validation** ([`ReconcileError::InvalidUserId`],
//!   [`ReconcileError::InvalidPaymentId`]): identifier validation failures
//! - **Storage** ([`ReconcileError::Storage`],
//!   [`ReconcileError::PaymentNotFound`]): data-access collaborator failures

use thiserror::Error;

use crate::models::PaymentId;

/// Result type alias for reconciliation operations.
///
/// All fallible functions in this crate return this type.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that can occur during subscription reconciliation.
///
/// # Error Recovery
///
/// - [`PersistenceConflict`](Self::PersistenceConflict) is the only
///   retryable variant: reload current state and re-run the reconciliation,
///   bounded by a small attempt count (see [`crate::reliability`]).
/// - [`AlreadyConsumed`](Self::AlreadyConsumed) is benign for batch callers:
///   skip the payment and continue.
/// - All other variants are non-retryable for the failing invocation and
///   leave no partial writes behind.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Payment is not in `success` status.
    ///
    /// The payment must never be marked consumed in this case; it stays in
    /// place for the external payment processor to settle or fail.
    #[error("invalid payment state: {0}")]
    InvalidPaymentState(String),

    /// Payment was already applied to a subscription.
    ///
    /// This is the idempotency guard against double-crediting on retry or
    /// duplicate invocation. The subscription record is unchanged.
    #[error("payment {0} already consumed")]
    AlreadyConsumed(PaymentId),

    /// Invalid monthly price or other precondition violation.
    ///
    /// Fatal for the invocation and non-retryable; no writes occur before
    /// validation, so state is not corrupted.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A concurrent commit for the same payment won the race.
    ///
    /// The caller should reload current state and retry the full
    /// reconciliation; the losing attempt will then observe
    /// [`AlreadyConsumed`](Self::AlreadyConsumed) instead of overwriting
    /// the winner's extension.
    #[error("concurrent reconciliation won the commit race")]
    PersistenceConflict,

    /// User identifier failed validation.
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    /// Payment identifier failed validation.
    #[error("invalid payment id: {0}")]
    InvalidPaymentId(String),

    /// No payment matched the lookup.
    ///
    /// Raised when an explicit payment id does not exist, or when a user has
    /// no successful unconsumed payment to apply.
    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// Data-access collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentId;

    #[test]
    fn test_invalid_payment_state_display() {
        let error = ReconcileError::InvalidPaymentState("status is pending".into());
        assert_eq!(error.to_string(), "invalid payment state: status is pending");
    }

    #[test]
    fn test_already_consumed_display() {
        let error = ReconcileError::AlreadyConsumed(PaymentId::new("pay-1").unwrap());
        assert_eq!(error.to_string(), "payment pay-1 already consumed");
    }

    #[test]
    fn test_configuration_error_display() {
        let error = ReconcileError::ConfigurationError("monthly price must be positive".into());
        assert!(error.to_string().contains("configuration error"));
    }

    #[test]
    fn test_persistence_conflict_display() {
        let error = ReconcileError::PersistenceConflict;
        assert!(error.to_string().contains("commit race"));
    }
}
