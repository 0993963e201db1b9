//! Storage seam for the external data-access collaborator.
//!
//! The reconciliation core owns no persisted format; it talks to storage
//! through [`SubscriptionStore`]. The one nontrivial obligation on
//! implementors is the commit contract: the record update and the payment's
//! consumed-flag transition are applied as a single atomic unit, conditional
//! on the record still matching the snapshot the caller computed from. A
//! commit that finds the flag already set, or the record changed since it
//! was loaded, reports [`CommitOutcome::Conflict`] instead of overwriting.
//! [`MemoryStore`] is the reference implementation, used by the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::models::{Payment, PaymentId, PaymentStatus, SubscriptionRecord, UserId};

/// Result of an atomic reconciliation commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Record persisted; payment (if given) transitioned to consumed.
    Committed,
    /// The payment was already consumed, or the record changed since it was
    /// loaded; nothing was written.
    ///
    /// A concurrent reconciliation won the race. The caller should reload
    /// state and re-run.
    Conflict,
}

/// Data-access operations consumed by the reconciliation service.
///
/// Methods are async to match callers that back this trait with a database
/// or remote API; [`MemoryStore`] completes them synchronously.
#[allow(
    async_fn_in_trait,
    reason = "in-process callers only; implementors choose their own Send bounds"
)]
pub trait SubscriptionStore {
    /// Loads the user's subscription record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Storage`] on collaborator failure.
    async fn load_record(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>>;

    /// Loads a single payment by id.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Storage`] on collaborator failure.
    async fn load_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>>;

    /// Loads successful, unconsumed payments.
    ///
    /// Scoped to one user when `user_id` is given, ordered by payment
    /// timestamp descending; unscoped order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Storage`] on collaborator failure.
    async fn load_successful_unconsumed(&self, user_id: Option<&UserId>) -> Result<Vec<Payment>>;

    /// Atomically persists `next` and marks `payment_id` consumed.
    ///
    /// `expected` is the user's record as the caller loaded it (`None` for
    /// no record); `next` was computed from that snapshot. If the stored
    /// record no longer matches `expected`, the snapshot is stale — another
    /// reconciliation committed in between — and nothing is written:
    /// [`CommitOutcome::Conflict`] is returned so the caller can reload and
    /// recompute. Without this check, two concurrent reconciliations of the
    /// same user through *different* payments would each extend the original
    /// expiry and the later write would silently drop the earlier extension.
    ///
    /// With `payment_id` absent, persists the record alone (used to create
    /// the default record for a zero-month payment). With it present, the
    /// record write and the consumed transition happen together or not at
    /// all; an already-consumed payment is also a
    /// [`CommitOutcome::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::PaymentNotFound`] if the payment row is
    /// gone, or [`ReconcileError::Storage`] on collaborator failure.
    async fn commit_reconciliation(
        &self,
        user_id: &UserId,
        expected: Option<&SubscriptionRecord>,
        next: SubscriptionRecord,
        payment_id: Option<&PaymentId>,
    ) -> Result<CommitOutcome>;
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<UserId, SubscriptionRecord>,
    payments: HashMap<PaymentId, Payment>,
}

/// In-memory store backing tests and examples.
///
/// A single mutex over both tables makes every commit atomic: no reader can
/// observe a record updated without its payment marked, or vice versa.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a payment.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    pub fn insert_payment(&self, payment: Payment) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.payments.insert(payment.id.clone(), payment);
    }

    /// Inserts or replaces a subscription record.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    pub fn insert_record(&self, record: SubscriptionRecord) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.records.insert(record.user_id.clone(), record);
    }

    /// Returns a snapshot of a payment.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn payment(&self, payment_id: &PaymentId) -> Option<Payment> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.payments.get(payment_id).cloned()
    }

    /// Returns a snapshot of a user's record.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn record(&self, user_id: &UserId) -> Option<SubscriptionRecord> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.records.get(user_id).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| ReconcileError::Storage("store mutex poisoned".to_owned()))
    }
}

impl SubscriptionStore for MemoryStore {
    async fn load_record(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        Ok(self.lock()?.records.get(user_id).cloned())
    }

    async fn load_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.lock()?.payments.get(payment_id).cloned())
    }

    async fn load_successful_unconsumed(&self, user_id: Option<&UserId>) -> Result<Vec<Payment>> {
        let state = self.lock()?;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Success && !p.consumed)
            .filter(|p| user_id.is_none_or(|user| p.user_id == *user))
            .cloned()
            .collect();
        if user_id.is_some() {
            payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        }
        Ok(payments)
    }

    async fn commit_reconciliation(
        &self,
        user_id: &UserId,
        expected: Option<&SubscriptionRecord>,
        next: SubscriptionRecord,
        payment_id: Option<&PaymentId>,
    ) -> Result<CommitOutcome> {
        let mut state = self.lock()?;
        if state.records.get(user_id) != expected {
            debug!(user = %user_id, "commit lost the record-snapshot race");
            return Ok(CommitOutcome::Conflict);
        }
        if let Some(payment_id) = payment_id {
            let Some(payment) = state.payments.get_mut(payment_id) else {
                return Err(ReconcileError::PaymentNotFound(format!(
                    "payment {payment_id} does not exist"
                )));
            };
            if payment.consumed {
                debug!(payment = %payment_id, "commit lost the consumed-flag race");
                return Ok(CommitOutcome::Conflict);
            }
            payment.consumed = true;
        }
        state.records.insert(user_id.clone(), next);
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::SubscriptionStatus;

    fn user(n: u32) -> UserId {
        UserId::new(format!("user-{n}")).unwrap()
    }

    fn payment(id: &str, n: u32, minutes_ago: i64) -> Payment {
        Payment {
            id: PaymentId::new(id).unwrap(),
            user_id: user(n),
            amount: dec!(500),
            status: PaymentStatus::Success,
            consumed: false,
            paid_at: Utc::now() - Duration::minutes(minutes_ago),
            tx_ref: format!("tx-{id}"),
        }
    }

    fn record(n: u32) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id: user(n),
            status: SubscriptionStatus::Active,
            expires_at: Some(Utc::now() + Duration::days(30)),
            verified: true,
        }
    }

    // ========================================================================
    // Load Tests
    // ========================================================================

    #[tokio::test]
    async fn test_load_record_absent() {
        let store = MemoryStore::new();
        assert!(store.load_record(&user(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_unconsumed_scoped_is_newest_first() {
        let store = MemoryStore::new();
        store.insert_payment(payment("pay-old", 1, 60));
        store.insert_payment(payment("pay-new", 1, 5));
        store.insert_payment(payment("pay-other", 2, 1));

        let payments = store.load_successful_unconsumed(Some(&user(1))).await.unwrap();
        let ids: Vec<&str> = payments.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["pay-new", "pay-old"]);
    }

    #[tokio::test]
    async fn test_load_unconsumed_excludes_consumed_and_unsettled() {
        let store = MemoryStore::new();
        let mut consumed = payment("pay-consumed", 1, 30);
        consumed.consumed = true;
        let mut pending = payment("pay-pending", 1, 20);
        pending.status = PaymentStatus::Pending;
        store.insert_payment(consumed);
        store.insert_payment(pending);
        store.insert_payment(payment("pay-good", 1, 10));

        let payments = store.load_successful_unconsumed(Some(&user(1))).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].id.as_str(), "pay-good");
    }

    // ========================================================================
    // Commit Contract Tests
    // ========================================================================

    #[tokio::test]
    async fn test_commit_marks_payment_and_stores_record_together() {
        let store = MemoryStore::new();
        let pay = payment("pay-1", 1, 0);
        store.insert_payment(pay.clone());

        let outcome = store
            .commit_reconciliation(&user(1), None, record(1), Some(&pay.id))
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Committed);
        assert!(store.payment(&pay.id).unwrap().consumed);
        assert!(store.record(&user(1)).is_some());
    }

    #[tokio::test]
    async fn test_second_commit_for_same_payment_conflicts() {
        let store = MemoryStore::new();
        let pay = payment("pay-1", 1, 0);
        store.insert_payment(pay.clone());

        let first = store
            .commit_reconciliation(&user(1), None, record(1), Some(&pay.id))
            .await
            .unwrap();
        let before = store.record(&user(1));
        // Fresh snapshot, so only the consumed flag stands in the way
        let second = store
            .commit_reconciliation(&user(1), before.as_ref(), record(1), Some(&pay.id))
            .await
            .unwrap();

        assert_eq!(first, CommitOutcome::Committed);
        assert_eq!(second, CommitOutcome::Conflict);
        // Losing commit wrote nothing
        assert_eq!(store.record(&user(1)), before);
    }

    #[tokio::test]
    async fn test_commit_with_stale_snapshot_conflicts() {
        let store = MemoryStore::new();
        let pay_a = payment("pay-a", 1, 10);
        let pay_b = payment("pay-b", 1, 5);
        store.insert_payment(pay_a.clone());
        store.insert_payment(pay_b.clone());

        // Two reconciliations both loaded "no record" before either committed
        let first = store
            .commit_reconciliation(&user(1), None, record(1), Some(&pay_a.id))
            .await
            .unwrap();
        let after_first = store.record(&user(1));
        let second = store
            .commit_reconciliation(&user(1), None, record(1), Some(&pay_b.id))
            .await
            .unwrap();

        assert_eq!(first, CommitOutcome::Committed);
        assert_eq!(second, CommitOutcome::Conflict);
        // The stale commit wrote nothing: record untouched, its payment still
        // available for a recomputed attempt
        assert_eq!(store.record(&user(1)), after_first);
        assert!(!store.payment(&pay_b.id).unwrap().consumed);
    }

    #[tokio::test]
    async fn test_commit_without_payment_persists_record_only() {
        let store = MemoryStore::new();
        let outcome = store.commit_reconciliation(&user(1), None, record(1), None).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
        assert!(store.record(&user(1)).is_some());
    }

    #[tokio::test]
    async fn test_commit_missing_payment_errors() {
        let store = MemoryStore::new();
        let missing = PaymentId::new("pay-missing").unwrap();
        let result = store.commit_reconciliation(&user(1), None, record(1), Some(&missing)).await;
        assert!(matches!(result.unwrap_err(), ReconcileError::PaymentNotFound(_)));
    }
}
