//! Reconciler configuration.

use rust_decimal::Decimal;

use crate::error::{ReconcileError, Result};
use crate::reliability::RetryPolicy;

/// Validated configuration for the reconciliation service.
///
/// The monthly price is a plan-level constant passed in explicitly; the
/// calculator never hard-codes it, so it can vary by plan.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Price of one subscription month, in plan currency units.
    pub monthly_price: Decimal,
    /// Retry policy for commit conflicts.
    pub retry: RetryPolicy,
}

impl ReconcilerConfig {
    /// Creates a configuration with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ConfigurationError`] if `monthly_price` is
    /// not positive.
    pub fn new(monthly_price: Decimal) -> Result<Self> {
        if monthly_price <= Decimal::ZERO {
            return Err(ReconcileError::ConfigurationError(format!(
                "monthly price must be positive, got {monthly_price}"
            )));
        }
        Ok(Self { monthly_price, retry: RetryPolicy::default() })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_config_valid_price() {
        let config = ReconcilerConfig::new(dec!(500)).unwrap();
        assert_eq!(config.monthly_price, dec!(500));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_zero_price_rejected() {
        let result = ReconcilerConfig::new(dec!(0));
        assert!(matches!(result.unwrap_err(), ReconcileError::ConfigurationError(_)));
    }

    #[test]
    fn test_config_negative_price_rejected() {
        assert!(ReconcilerConfig::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_config_with_retry() {
        let config = ReconcilerConfig::new(dec!(500))
            .unwrap()
            .with_retry(RetryPolicy::with_max_attempts(7));
        assert_eq!(config.retry.max_attempts, 7);
    }
}
