//! Reconciliation service: load, reconcile, commit.
//!
//! Orchestrates the pure [`crate::reconciler`] core against a
//! [`SubscriptionStore`], with bounded retry on commit conflicts. Callers
//! may run concurrently across users freely; same-user races resolve
//! through the store's snapshot-conditioned commit. Two reconciliations of
//! the *same* payment leave the loser observing
//! [`ReconcileError::AlreadyConsumed`]; two through *different* payments
//! both land, the loser recomputing so its extension stacks on the
//! winner's instead of overwriting it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::models::{Payment, PaymentId, ReconciliationOutcome, UserId};
use crate::reconciler;
use crate::reliability::retry_with_backoff;
use crate::store::{CommitOutcome, SubscriptionStore};

/// Per-payment result within a batch.
///
/// Batch callers recover every failure at single-payment granularity; one
/// payment's failure never aborts the rest of the batch.
#[derive(Debug)]
pub struct BatchEntry {
    /// Payment this entry reports on.
    pub payment_id: PaymentId,
    /// What happened to it.
    pub disposition: BatchDisposition,
}

/// Disposition of one payment in a batch.
#[derive(Debug)]
pub enum BatchDisposition {
    /// Payment applied; subscription extended.
    Applied(ReconciliationOutcome),
    /// Payment was already consumed; benign no-op.
    SkippedAlreadyConsumed,
    /// Payment failed with the given reason.
    Failed(ReconcileError),
}

/// Subscription reconciliation service over a storage backend.
#[derive(Debug)]
pub struct Reconciler<S> {
    store: S,
    config: ReconcilerConfig,
}

impl<S: SubscriptionStore> Reconciler<S> {
    /// Creates a service over `store` with the given configuration.
    #[must_use]
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconciles one payment for a user at the current wall-clock time.
    ///
    /// See [`reconcile_one_at`](Self::reconcile_one_at).
    ///
    /// # Errors
    ///
    /// As [`reconcile_one_at`](Self::reconcile_one_at).
    pub async fn reconcile_one(
        &self,
        user_id: &UserId,
        payment_id: Option<&PaymentId>,
    ) -> Result<ReconciliationOutcome> {
        self.reconcile_one_at(user_id, payment_id, Utc::now()).await
    }

    /// Reconciles one payment for a user, evaluating state at `now`.
    ///
    /// With `payment_id` absent, the user's most recent successful
    /// unconsumed payment is resolved once, up front; conflict retries stay
    /// pinned to that payment rather than re-resolving against state that
    /// may have shifted mid-flight. The read-modify-write is retried on
    /// commit conflicts per the configured policy; a losing concurrent
    /// attempt re-reads state and surfaces
    /// [`ReconcileError::AlreadyConsumed`].
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::PaymentNotFound`] if no applicable payment exists.
    /// - [`ReconcileError::InvalidPaymentState`] if the payment is not in
    ///   `success` status or belongs to another user.
    /// - [`ReconcileError::AlreadyConsumed`] if the payment was applied
    ///   before (idempotency guard).
    /// - [`ReconcileError::PersistenceConflict`] once conflict retries are
    ///   exhausted.
    /// - [`ReconcileError::ConfigurationError`] / [`ReconcileError::Storage`]
    ///   for misconfiguration and collaborator failures.
    pub async fn reconcile_one_at(
        &self,
        user_id: &UserId,
        payment_id: Option<&PaymentId>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        let payment_id = match payment_id {
            Some(payment_id) => payment_id.clone(),
            None => self.resolve_latest_payment_id(user_id).await?,
        };
        retry_with_backoff(&self.config.retry, || {
            self.reconcile_attempt(user_id, &payment_id, now)
        })
        .await
    }

    /// Reconciles a set of payments at the current wall-clock time.
    ///
    /// See [`reconcile_batch_at`](Self::reconcile_batch_at).
    pub async fn reconcile_batch(&self, payment_ids: &[PaymentId]) -> Vec<BatchEntry> {
        self.reconcile_batch_at(payment_ids, Utc::now()).await
    }

    /// Reconciles a set of payments, evaluating state at `now`.
    ///
    /// Payments are grouped per user and applied in payment-timestamp order
    /// regardless of input order, so a later payment sees the stacked effect
    /// of an earlier one for the same user. Every failure is captured in the
    /// returned entries; none aborts the batch.
    pub async fn reconcile_batch_at(
        &self,
        payment_ids: &[PaymentId],
        now: DateTime<Utc>,
    ) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(payment_ids.len());
        let mut per_user: BTreeMap<UserId, Vec<Payment>> = BTreeMap::new();

        for payment_id in payment_ids {
            match self.store.load_payment(payment_id).await {
                Ok(Some(payment)) => {
                    per_user.entry(payment.user_id.clone()).or_default().push(payment);
                }
                Ok(None) => entries.push(BatchEntry {
                    payment_id: payment_id.clone(),
                    disposition: BatchDisposition::Failed(ReconcileError::PaymentNotFound(
                        format!("payment {payment_id} does not exist"),
                    )),
                }),
                Err(error) => entries.push(BatchEntry {
                    payment_id: payment_id.clone(),
                    disposition: BatchDisposition::Failed(error),
                }),
            }
        }

        for (user_id, mut payments) in per_user {
            // Oldest first, so stacking sees prior extensions
            payments.sort_by(|a, b| a.paid_at.cmp(&b.paid_at));
            for payment in payments {
                let disposition =
                    match self.reconcile_one_at(&user_id, Some(&payment.id), now).await {
                        Ok(outcome) => BatchDisposition::Applied(outcome),
                        Err(ReconcileError::AlreadyConsumed(_)) => {
                            debug!(user = %user_id, payment = %payment.id, "skipping consumed payment");
                            BatchDisposition::SkippedAlreadyConsumed
                        }
                        Err(error) => {
                            warn!(user = %user_id, payment = %payment.id, error = %error, "payment failed to reconcile");
                            BatchDisposition::Failed(error)
                        }
                    };
                entries.push(BatchEntry { payment_id: payment.id, disposition });
            }
        }

        entries
    }

    /// Reconciles every successful unconsumed payment across all users.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Storage`] if the unconsumed-payment listing
    /// itself fails; per-payment failures are captured in the entries.
    pub async fn reconcile_all(&self) -> Result<Vec<BatchEntry>> {
        let payments = self.store.load_successful_unconsumed(None).await?;
        info!(count = payments.len(), "reconciling all unconsumed payments");
        let ids: Vec<PaymentId> = payments.into_iter().map(|p| p.id).collect();
        Ok(self.reconcile_batch(&ids).await)
    }

    /// One load-reconcile-commit pass against a pinned payment. Conflicts
    /// surface as [`ReconcileError::PersistenceConflict`] for the retry
    /// wrapper.
    async fn reconcile_attempt(
        &self,
        user_id: &UserId,
        payment_id: &PaymentId,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        let payment = self.load_owned_payment(user_id, payment_id).await?;
        let current = self.store.load_record(user_id).await?;

        let outcome =
            reconciler::reconcile(current.as_ref(), &payment, self.config.monthly_price, now)?;

        if outcome.mark_consumed {
            let committed = self
                .store
                .commit_reconciliation(
                    user_id,
                    current.as_ref(),
                    outcome.next.clone(),
                    Some(&payment.id),
                )
                .await?;
            if committed == CommitOutcome::Conflict {
                return Err(ReconcileError::PersistenceConflict);
            }
            info!(
                user = %user_id,
                payment = %payment.id,
                months = outcome.months_granted,
                "subscription extended"
            );
        } else if current.is_none() {
            // Zero months granted: create the default record, leave the
            // payment unconsumed for manual review.
            let committed = self
                .store
                .commit_reconciliation(user_id, None, outcome.next.clone(), None)
                .await?;
            if committed == CommitOutcome::Conflict {
                return Err(ReconcileError::PersistenceConflict);
            }
            debug!(user = %user_id, payment = %payment.id, "created default record, no credit applied");
        } else {
            debug!(user = %user_id, payment = %payment.id, "no credit applied");
        }

        Ok(ReconciliationOutcome {
            user_id: user_id.clone(),
            payment_id: payment.id,
            months_granted: outcome.months_granted,
            remainder: outcome.remainder,
            new_status: outcome.next.status_at(now),
            new_expires_at: outcome.next.expires_at,
            verified: outcome.next.verified,
            consumed_now: outcome.mark_consumed,
        })
    }

    async fn load_owned_payment(
        &self,
        user_id: &UserId,
        payment_id: &PaymentId,
    ) -> Result<Payment> {
        let payment = self.store.load_payment(payment_id).await?.ok_or_else(|| {
            ReconcileError::PaymentNotFound(format!("payment {payment_id} does not exist"))
        })?;
        if payment.user_id != *user_id {
            return Err(ReconcileError::InvalidPaymentState(format!(
                "payment {payment_id} belongs to user {}, not {user_id}",
                payment.user_id
            )));
        }
        Ok(payment)
    }

    /// Picks the user's most recent successful unconsumed payment, per store
    /// order.
    async fn resolve_latest_payment_id(&self, user_id: &UserId) -> Result<PaymentId> {
        let payments = self.store.load_successful_unconsumed(Some(user_id)).await?;
        payments.into_iter().next().map(|payment| payment.id).ok_or_else(|| {
            ReconcileError::PaymentNotFound(format!(
                "no successful unconsumed payment for user {user_id}"
            ))
        })
    }
}
