//! Subscriptions, payments and premium access
//!
//! - [`SubscriptionLedger`]: trial, purchase, cancel and lazy expiry
//! - [`PaymentReconciler`]: pending payments and provider callbacks
//! - [`EntitlementGate`]: the premium access decision
//!
//! All three are cheap to clone and share one injected [`crate::store::BillingStore`]
//! and [`crate::clock::Clock`].

mod entitlement;
mod error;
mod ledger;
mod reconciliation;

pub use entitlement::EntitlementGate;
pub use error::BillingError;
pub use ledger::{LedgerPolicy, SubscriptionLedger};
pub use reconciliation::{CallbackOutcome, CallbackStatus, PaymentReconciler, ReconcileReport};
