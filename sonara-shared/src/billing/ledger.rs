//! Subscription ledger
//!
//! Owns the per-user subscription state machine. Every mutation is delegated
//! to one atomic [`BillingStore`] call, so "retire the old, insert the new"
//! can never be observed half done and two concurrent purchases for one user
//! cannot both leave an active row behind.
//!
//! # Example
//!
//! ```
//! use sonara_shared::billing::{LedgerPolicy, SubscriptionLedger};
//! use sonara_shared::clock::SystemClock;
//! use sonara_shared::models::subscription::{Plan, SubscriptionStatus};
//! use sonara_shared::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = SubscriptionLedger::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     LedgerPolicy::default(),
//! );
//!
//! ledger.purchase(1, Plan::Basic).await?;
//! let pro = ledger.purchase(1, Plan::Pro).await?;
//!
//! let current = ledger.current_entitlement(1).await?;
//! assert_eq!(current.map(|s| s.id), Some(pro.id));
//! assert_eq!(pro.status, SubscriptionStatus::Active);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::BillingError;
use crate::clock::Clock;
use crate::models::subscription::{NewSubscription, Plan, Subscription};
use crate::store::{Activation, BillingStore, StoreError};
use crate::UserId;

/// Lengths of trials and paid periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub trial_length: Duration,
    pub billing_period: Duration,
}

impl LedgerPolicy {
    pub const DEFAULT_TRIAL_DAYS: i64 = 7;
    pub const DEFAULT_BILLING_PERIOD_DAYS: i64 = 30;

    pub fn from_days(trial_days: i64, billing_period_days: i64) -> Self {
        Self {
            trial_length: Duration::days(trial_days),
            billing_period: Duration::days(billing_period_days),
        }
    }
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self::from_days(Self::DEFAULT_TRIAL_DAYS, Self::DEFAULT_BILLING_PERIOD_DAYS)
    }
}

/// Per-user subscription state machine
#[derive(Clone)]
pub struct SubscriptionLedger {
    store: Arc<dyn BillingStore>,
    clock: Arc<dyn Clock>,
    policy: LedgerPolicy,
}

impl SubscriptionLedger {
    pub fn new(store: Arc<dyn BillingStore>, clock: Arc<dyn Clock>, policy: LedgerPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    /// Current instant on the ledger's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts a trial of `plan`
    ///
    /// # Errors
    ///
    /// `BillingError::Conflict` if the user already has a live trial or paid
    /// subscription. A lapsed one does not block a new trial.
    pub async fn start_trial(
        &self,
        owner: UserId,
        plan: Plan,
    ) -> Result<Subscription, BillingError> {
        let now = self.now();
        let new = NewSubscription::trial(owner, plan, now, self.policy.trial_length);

        let trial = self
            .store
            .insert_exclusive(new, now)
            .await
            .map_err(|e| conflict_for(owner, e))?;

        info!(
            user_id = owner,
            subscription_id = trial.id,
            plan = %plan,
            trial_until = ?trial.trial_until,
            "Trial started"
        );
        Ok(trial)
    }

    /// Replaces any entitling subscription with a new paid period of `plan`
    pub async fn purchase(&self, owner: UserId, plan: Plan) -> Result<Subscription, BillingError> {
        let now = self.now();
        let new = NewSubscription::active(owner, plan, now, self.policy.billing_period);

        let active = self
            .store
            .replace_entitling(new, now)
            .await
            .map_err(|e| conflict_for(owner, e))?;

        info!(
            user_id = owner,
            subscription_id = active.id,
            plan = %plan,
            renew_at = ?active.renew_at,
            "Subscription purchased"
        );
        Ok(active)
    }

    /// Cancels the live entitling subscription
    ///
    /// Returns None, not an error, when there is nothing to cancel.
    pub async fn cancel(&self, owner: UserId) -> Result<Option<Subscription>, BillingError> {
        let canceled = self.store.cancel_entitling(owner, self.now()).await?;

        match &canceled {
            Some(sub) => info!(user_id = owner, subscription_id = sub.id, "Subscription canceled"),
            None => debug!(user_id = owner, "Cancel requested without an entitling subscription"),
        }
        Ok(canceled)
    }

    /// The subscription granting access right now, if any
    ///
    /// A subscription is valid up to and including its boundary instant. A
    /// lapsed row reads as None and its expiry is written back on a best
    /// effort basis.
    pub async fn current_entitlement(
        &self,
        owner: UserId,
    ) -> Result<Option<Subscription>, BillingError> {
        let now = self.now();
        let Some(latest) = self.store.latest_entitling(owner).await? else {
            return Ok(None);
        };

        if latest.is_entitling_at(now) {
            return Ok(Some(latest));
        }

        match self.store.expire_subscription(latest.id, now).await {
            Ok(_) => debug!(
                user_id = owner,
                subscription_id = latest.id,
                "Lapsed subscription expired"
            ),
            Err(e) => warn!(
                user_id = owner,
                subscription_id = latest.id,
                error = %e,
                "Failed to persist lapsed subscription expiry"
            ),
        }
        Ok(None)
    }

    /// Every subscription of `owner`, newest first
    pub async fn history(&self, owner: UserId) -> Result<Vec<Subscription>, BillingError> {
        Ok(self.store.list_subscriptions(owner).await?)
    }

    /// Activates the subscription paid for by a succeeded payment
    ///
    /// Idempotent: a payment that was already applied yields
    /// [`Activation::Skipped`].
    pub async fn activate_payment(&self, payment_id: i64) -> Result<Activation, StoreError> {
        let now = self.now();
        self.store
            .apply_payment(payment_id, now + self.policy.billing_period, now)
            .await
    }
}

fn conflict_for(owner: UserId, err: StoreError) -> BillingError {
    match err {
        StoreError::Conflict => BillingError::Conflict(owner),
        other => BillingError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::subscription::SubscriptionStatus;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn ledger() -> (SubscriptionLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()));
        let ledger = SubscriptionLedger::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            LedgerPolicy::default(),
        );
        (ledger, clock)
    }

    #[test]
    fn test_default_policy() {
        let policy = LedgerPolicy::default();
        assert_eq!(policy.trial_length, Duration::days(7));
        assert_eq!(policy.billing_period, Duration::days(30));
    }

    #[tokio::test]
    async fn test_trial_then_second_trial_conflicts() {
        let (ledger, clock) = ledger();

        let trial = ledger.start_trial(1, Plan::Pro).await.unwrap();
        assert_eq!(trial.status, SubscriptionStatus::Trialing);
        assert_eq!(trial.trial_until, Some(clock.now() + Duration::days(7)));

        assert!(matches!(
            ledger.start_trial(1, Plan::Basic).await,
            Err(BillingError::Conflict(1))
        ));
    }

    #[tokio::test]
    async fn test_trial_blocked_by_active_purchase() {
        let (ledger, _) = ledger();
        ledger.purchase(2, Plan::Family).await.unwrap();
        assert!(matches!(
            ledger.start_trial(2, Plan::Family).await,
            Err(BillingError::Conflict(2))
        ));
    }

    #[tokio::test]
    async fn test_cancel_without_subscription_is_noop() {
        let (ledger, _) = ledger();
        assert!(ledger.cancel(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_trial() {
        let (ledger, clock) = ledger();
        ledger.start_trial(4, Plan::Basic).await.unwrap();

        let canceled = ledger.cancel(4).await.unwrap().unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert_eq!(canceled.canceled_at, Some(clock.now()));
        assert!(ledger.current_entitlement(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_is_inclusive_at_boundary() {
        let (ledger, clock) = ledger();
        let active = ledger.purchase(5, Plan::Pro).await.unwrap();
        let renew_at = active.renew_at.unwrap();

        clock.set(renew_at);
        assert_eq!(
            ledger.current_entitlement(5).await.unwrap().map(|s| s.id),
            Some(active.id)
        );

        clock.set(renew_at + Duration::microseconds(1));
        assert!(ledger.current_entitlement(5).await.unwrap().is_none());

        let history = ledger.history(5).await.unwrap();
        assert_eq!(history[0].status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_after_lapse_reports_nothing() {
        let (ledger, clock) = ledger();
        ledger.start_trial(6, Plan::Basic).await.unwrap();
        clock.advance(Duration::days(8));

        assert!(ledger.cancel(6).await.unwrap().is_none());
        assert_eq!(ledger.history(6).await.unwrap()[0].status, SubscriptionStatus::Expired);
    }
}
