//! Payment reconciliation
//!
//! Applies provider callbacks to recorded payments. Callbacks may arrive more
//! than once, late, or for the wrong user; each is handled as follows:
//!
//! 1. The status string is parsed first. Anything but `succeeded` or `failed`
//!    is rejected before any lookup.
//! 2. The payment is located by provider reference and must belong to the
//!    identity in the callback, otherwise `NotFound`. Nothing is ever created.
//! 3. A pending payment is resolved with a guarded update. A payment that is
//!    already resolved is a no-op ([`CallbackOutcome::AlreadyResolved`]).
//! 4. On success the subscription is activated in a separate atomic step that
//!    stamps the payment `applied_at`. If that step fails the payment stays
//!    succeeded-but-unapplied; a redelivered callback or
//!    [`PaymentReconciler::reconcile_unapplied`] retries it.

use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{BillingError, SubscriptionLedger};
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::subscription::{Plan, Subscription};
use crate::store::{Activation, BillingStore};
use crate::UserId;

/// Outcome reported by the payment provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Succeeded,
    Failed,
}

impl FromStr for CallbackStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(CallbackStatus::Succeeded),
            "failed" => Ok(CallbackStatus::Failed),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }
}

impl From<CallbackStatus> for PaymentStatus {
    fn from(status: CallbackStatus) -> Self {
        match status {
            CallbackStatus::Succeeded => PaymentStatus::Succeeded,
            CallbackStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// What a callback did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Payment succeeded and its subscription is now active
    Activated {
        payment_id: i64,
        subscription: Subscription,
    },

    /// Payment marked failed; subscriptions untouched
    Failed { payment_id: i64 },

    /// Payment had already been resolved; nothing changed
    AlreadyResolved {
        payment_id: i64,
        status: PaymentStatus,
    },
}

/// Tally of one [`PaymentReconciler::reconcile_unapplied`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub failed: usize,
}

/// Applies provider callbacks to payments and the subscription ledger
#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn BillingStore>,
    ledger: SubscriptionLedger,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn BillingStore>, ledger: SubscriptionLedger) -> Self {
        Self { store, ledger }
    }

    /// Records a pending payment for `plan`
    ///
    /// The payment is linked to the user's current entitling subscription, if
    /// any, and gets a fresh provider reference.
    ///
    /// # Errors
    ///
    /// `BillingError::InvalidAmount` unless `amount` is positive.
    pub async fn record_pending_payment(
        &self,
        owner: UserId,
        plan: Plan,
        amount: i64,
    ) -> Result<Payment, BillingError> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        let current = self.ledger.current_entitlement(owner).await?;
        let new = NewPayment {
            user_id: owner,
            subscription_id: current.map(|s| s.id),
            plan,
            provider_ref: Uuid::new_v4().simple().to_string(),
            amount,
        };

        let payment = self.store.insert_payment(new, self.ledger.now()).await?;
        info!(
            user_id = owner,
            payment_id = payment.id,
            provider_ref = %payment.provider_ref,
            plan = %plan,
            amount,
            "Pending payment recorded"
        );
        Ok(payment)
    }

    /// Applies one provider callback
    ///
    /// # Errors
    ///
    /// - `UnknownStatus` for an unrecognized status (no mutation)
    /// - `NotFound` if no payment with `provider_ref` belongs to `identity`
    /// - `ActivationDeferred` if the payment is recorded succeeded but the
    ///   subscription could not be activated yet
    pub async fn apply_callback(
        &self,
        provider_ref: &str,
        status: &str,
        raw_payload: JsonValue,
        identity: UserId,
    ) -> Result<CallbackOutcome, BillingError> {
        let status: CallbackStatus = status.parse()?;

        let payment = self
            .store
            .find_payment_by_ref(provider_ref)
            .await?
            .filter(|p| p.user_id == identity)
            .ok_or_else(|| {
                warn!(provider_ref, user_id = identity, "Callback for unknown payment");
                BillingError::NotFound(provider_ref.to_string())
            })?;

        if payment.status.is_resolved() {
            return self.already_resolved(payment).await;
        }

        let resolved = self
            .store
            .resolve_payment(payment.id, status.into(), raw_payload, self.ledger.now())
            .await?;

        let Some(resolved) = resolved else {
            // Another delivery resolved it between the read and the update.
            let current = self
                .store
                .find_payment_by_ref(provider_ref)
                .await?
                .ok_or_else(|| BillingError::NotFound(provider_ref.to_string()))?;
            return self.already_resolved(current).await;
        };

        info!(
            payment_id = resolved.id,
            user_id = identity,
            status = %resolved.status,
            "Payment resolved"
        );

        match status {
            CallbackStatus::Failed => Ok(CallbackOutcome::Failed {
                payment_id: resolved.id,
            }),
            CallbackStatus::Succeeded => self.activate(&resolved).await,
        }
    }

    /// Retries activation for every succeeded payment that was never applied
    pub async fn reconcile_unapplied(&self) -> Result<ReconcileReport, BillingError> {
        let pending = self.store.unapplied_payments().await?;
        let mut report = ReconcileReport::default();

        for payment in &pending {
            match self.activate(payment).await {
                Ok(CallbackOutcome::Activated { .. }) => report.applied += 1,
                Ok(_) => {}
                Err(_) => report.failed += 1,
            }
        }

        if !pending.is_empty() {
            info!(
                applied = report.applied,
                failed = report.failed,
                "Reconciled unapplied payments"
            );
        }
        Ok(report)
    }

    async fn already_resolved(&self, payment: Payment) -> Result<CallbackOutcome, BillingError> {
        if payment.needs_activation() {
            debug!(payment_id = payment.id, "Retrying activation for unapplied payment");
            return self.activate(&payment).await;
        }

        debug!(
            payment_id = payment.id,
            status = %payment.status,
            "Callback for already resolved payment ignored"
        );
        Ok(CallbackOutcome::AlreadyResolved {
            payment_id: payment.id,
            status: payment.status,
        })
    }

    async fn activate(&self, payment: &Payment) -> Result<CallbackOutcome, BillingError> {
        match self.ledger.activate_payment(payment.id).await {
            Ok(Activation::Applied(subscription)) => {
                info!(
                    payment_id = payment.id,
                    user_id = payment.user_id,
                    subscription_id = subscription.id,
                    plan = %subscription.plan,
                    "Subscription activated by payment"
                );
                Ok(CallbackOutcome::Activated {
                    payment_id: payment.id,
                    subscription,
                })
            }
            Ok(Activation::Skipped) => Ok(CallbackOutcome::AlreadyResolved {
                payment_id: payment.id,
                status: payment.status,
            }),
            Err(source) => {
                error!(
                    payment_id = payment.id,
                    user_id = payment.user_id,
                    error = %source,
                    "Subscription activation failed; payment left unapplied"
                );
                Err(BillingError::ActivationDeferred {
                    payment_id: payment.id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_status_parsing() {
        assert_eq!("succeeded".parse::<CallbackStatus>().unwrap(), CallbackStatus::Succeeded);
        assert_eq!("failed".parse::<CallbackStatus>().unwrap(), CallbackStatus::Failed);

        for unknown in ["pending", "SUCCEEDED", "", "refunded"] {
            assert!(matches!(
                unknown.parse::<CallbackStatus>(),
                Err(BillingError::UnknownStatus(s)) if s == unknown
            ));
        }
    }

    #[test]
    fn test_callback_status_maps_to_payment_status() {
        assert_eq!(PaymentStatus::from(CallbackStatus::Succeeded), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from(CallbackStatus::Failed), PaymentStatus::Failed);
    }
}
