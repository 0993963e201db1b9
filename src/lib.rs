//! Subscription reconciliation core.
//!
//! Converts a monetary payment amount into a subscription-time extension
//! and reconciles that extension against a user's current subscription
//! state, guaranteeing each payment is applied at most once.
//!
//! # How it works
//!
//! - [`proration`] turns (amount paid, monthly price) into whole months
//!   granted plus a remainder, in exact decimal arithmetic.
//! - [`reconciler`] is the pure state transition: current record + payment
//!   + explicit "now" → next record + a mark-consumed flag. Extensions
//!   stack on the remaining time of a still-valid subscription; a lapsed
//!   one restarts from now.
//! - [`store`] is the seam to the external data-access collaborator, whose
//!   commit applies the record update and the payment's consumed-flag
//!   transition as one atomic unit.
//! - [`service`] orchestrates load → reconcile → commit with bounded
//!   backoff retry on commit conflicts, for single payments and batches.
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//! use subscription_reconciler::{
//!     MemoryStore, Reconciler, ReconcilerConfig,
//!     models::{Payment, PaymentId, PaymentStatus, UserId},
//! };
//!
//! # async fn example() -> subscription_reconciler::error::Result<()> {
//! let store = MemoryStore::new();
//! store.insert_payment(Payment {
//!     id: PaymentId::new("pay-1")?,
//!     user_id: UserId::new("user-1")?,
//!     amount: Decimal::new(1500, 0),
//!     status: PaymentStatus::Success,
//!     consumed: false,
//!     paid_at: Utc::now(),
//!     tx_ref: "tx-abc".to_owned(),
//! });
//!
//! let config = ReconcilerConfig::new(Decimal::new(500, 0))?;
//! let service = Reconciler::new(store, config);
//!
//! let outcome = service.reconcile_one(&UserId::new("user-1")?, None).await?;
//! assert_eq!(outcome.months_granted, 3);
//! assert!(outcome.consumed_now);
//!
//! // Applying the same payment again trips the idempotency guard.
//! let retry = service.reconcile_one(&UserId::new("user-1")?, None).await;
//! assert!(retry.is_err());
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Reconciliations for different users are independent and need no
//! coordination. For the same user, the commit is conditional on two
//! things: the payment's `consumed` flag transitioning false→true exactly
//! once, and the subscription record still matching the snapshot the
//! extension was computed from. A losing concurrent attempt observes a
//! conflict, retries against the now-current state, and either stacks its
//! extension on the winner's or resolves into
//! [`ReconcileError`](error::ReconcileError)`::AlreadyConsumed` rather
//! than double-applying.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod models;
pub mod proration;
pub mod reconciler;
pub mod reliability;
pub mod service;
pub mod store;

pub use config::ReconcilerConfig;
pub use error::{ReconcileError, Result};
pub use models::{Payment, ReconciliationOutcome, SubscriptionRecord};
pub use service::{BatchDisposition, BatchEntry, Reconciler};
pub use store::{CommitOutcome, MemoryStore, SubscriptionStore};
