//! Ledger, reconciliation and entitlement behavior against the in-memory store
//!
//! Run with: cargo test -p sonara-shared --test billing_tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value as JsonValue};
use sonara_shared::billing::{
    BillingError, CallbackOutcome, EntitlementGate, LedgerPolicy, PaymentReconciler,
    SubscriptionLedger,
};
use sonara_shared::clock::{Clock, ManualClock};
use sonara_shared::models::payment::{NewPayment, Payment, PaymentStatus};
use sonara_shared::models::subscription::{NewSubscription, Plan, Subscription, SubscriptionStatus};
use sonara_shared::store::{Activation, BillingStore, MemoryStore, StoreError};
use sonara_shared::UserId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory store whose payment activation can be made to fail
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_activation: AtomicBool,
}

#[async_trait]
impl BillingStore for FlakyStore {
    async fn latest_entitling(&self, owner: UserId) -> Result<Option<Subscription>, StoreError> {
        self.inner.latest_entitling(owner).await
    }

    async fn list_subscriptions(&self, owner: UserId) -> Result<Vec<Subscription>, StoreError> {
        self.inner.list_subscriptions(owner).await
    }

    async fn insert_exclusive(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        self.inner.insert_exclusive(new, now).await
    }

    async fn replace_entitling(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        self.inner.replace_entitling(new, now).await
    }

    async fn cancel_entitling(
        &self,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, StoreError> {
        self.inner.cancel_entitling(owner, now).await
    }

    async fn expire_subscription(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.expire_subscription(id, now).await
    }

    async fn insert_payment(
        &self,
        new: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Payment, StoreError> {
        self.inner.insert_payment(new, now).await
    }

    async fn find_payment_by_ref(&self, provider_ref: &str) -> Result<Option<Payment>, StoreError> {
        self.inner.find_payment_by_ref(provider_ref).await
    }

    async fn resolve_payment(
        &self,
        id: i64,
        status: PaymentStatus,
        raw_payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, StoreError> {
        self.inner.resolve_payment(id, status, raw_payload, now).await
    }

    async fn apply_payment(
        &self,
        payment_id: i64,
        renew_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Activation, StoreError> {
        if self.fail_activation.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.apply_payment(payment_id, renew_at, now).await
    }

    async fn unapplied_payments(&self) -> Result<Vec<Payment>, StoreError> {
        self.inner.unapplied_payments().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

struct Harness<S> {
    store: Arc<S>,
    clock: Arc<ManualClock>,
    ledger: SubscriptionLedger,
    reconciler: PaymentReconciler,
    gate: EntitlementGate,
}

fn harness<S: BillingStore + Default + 'static>() -> Harness<S> {
    let store = Arc::new(S::default());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()));
    let ledger = SubscriptionLedger::new(store.clone(), clock.clone(), LedgerPolicy::default());
    let reconciler = PaymentReconciler::new(store.clone(), ledger.clone());
    let gate = EntitlementGate::new(ledger.clone());

    Harness {
        store,
        clock,
        ledger,
        reconciler,
        gate,
    }
}

fn entitling_count(subs: &[Subscription]) -> usize {
    subs.iter().filter(|s| s.status.is_entitling()).count()
}

#[tokio::test]
async fn test_purchase_basic_then_pro() {
    let h = harness::<MemoryStore>();

    let basic = h.ledger.purchase(1, Plan::Basic).await.unwrap();
    h.clock.advance(Duration::minutes(5));
    let pro = h.ledger.purchase(1, Plan::Pro).await.unwrap();

    let history = h.ledger.history(1).await.unwrap();
    assert_eq!(entitling_count(&history), 1);

    let active: Vec<_> = history
        .iter()
        .filter(|s| s.status == SubscriptionStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, pro.id);
    assert_eq!(active[0].plan, Plan::Pro);

    let prior = history.iter().find(|s| s.id == basic.id).unwrap();
    assert_eq!(prior.status, SubscriptionStatus::Canceled);
    assert_eq!(prior.canceled_at, Some(h.clock.now()));
}

#[tokio::test]
async fn test_trial_then_purchase_replaces_trial() {
    let h = harness::<MemoryStore>();

    let trial = h.ledger.start_trial(1, Plan::Basic).await.unwrap();
    let paid = h.ledger.purchase(1, Plan::Basic).await.unwrap();

    let history = h.ledger.history(1).await.unwrap();
    assert_eq!(entitling_count(&history), 1);
    assert_eq!(
        history.iter().find(|s| s.id == trial.id).unwrap().status,
        SubscriptionStatus::Canceled
    );
    assert_eq!(
        h.ledger.current_entitlement(1).await.unwrap().map(|s| s.id),
        Some(paid.id)
    );
}

#[tokio::test]
async fn test_trial_boundary() {
    let h = harness::<MemoryStore>();
    let trial = h.ledger.start_trial(7, Plan::Family).await.unwrap();
    let until = trial.trial_until.unwrap();

    h.clock.set(until);
    assert!(h.gate.has_access(7).await.unwrap());

    h.clock.set(until + Duration::seconds(1));
    assert!(!h.gate.has_access(7).await.unwrap());

    // A lapsed trial no longer blocks a new one
    h.ledger.start_trial(7, Plan::Family).await.unwrap();
    assert!(h.gate.has_access(7).await.unwrap());
}

#[tokio::test]
async fn test_entitlement_gate_scenario() {
    let h = harness::<MemoryStore>();

    assert!(!h.gate.has_access(3).await.unwrap());

    h.ledger.purchase(3, Plan::Pro).await.unwrap();
    assert!(h.gate.has_access(3).await.unwrap());

    h.ledger.cancel(3).await.unwrap();
    assert!(!h.gate.has_access(3).await.unwrap());
}

#[tokio::test]
async fn test_users_are_isolated() {
    let h = harness::<MemoryStore>();
    h.ledger.purchase(1, Plan::Pro).await.unwrap();

    assert!(h.gate.has_access(1).await.unwrap());
    assert!(!h.gate.has_access(2).await.unwrap());
    assert!(h.ledger.cancel(2).await.unwrap().is_none());
    assert!(h.gate.has_access(1).await.unwrap());
}

#[tokio::test]
async fn test_record_pending_payment() {
    let h = harness::<MemoryStore>();

    assert!(matches!(
        h.reconciler.record_pending_payment(1, Plan::Pro, 0).await,
        Err(BillingError::InvalidAmount(0))
    ));
    assert!(matches!(
        h.reconciler.record_pending_payment(1, Plan::Pro, -5).await,
        Err(BillingError::InvalidAmount(-5))
    ));

    let first = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();
    let second = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    assert_eq!(first.status, PaymentStatus::Pending);
    assert_eq!(first.subscription_id, None);
    assert_eq!(first.provider_ref.len(), 32);
    assert_ne!(first.provider_ref, second.provider_ref);
}

#[tokio::test]
async fn test_successful_callback_activates_once() {
    let h = harness::<MemoryStore>();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();
    let body = json!({"paymentId": payment.provider_ref, "status": "succeeded", "userId": 1});

    let first = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", body.clone(), 1)
        .await
        .unwrap();
    let subscription = match first {
        CallbackOutcome::Activated { subscription, .. } => subscription,
        other => panic!("expected activation, got {:?}", other),
    };
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.plan, Plan::Pro);
    assert_eq!(subscription.renew_at, Some(h.clock.now() + Duration::days(30)));

    let second = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", body, 1)
        .await
        .unwrap();
    assert_eq!(
        second,
        CallbackOutcome::AlreadyResolved {
            payment_id: payment.id,
            status: PaymentStatus::Succeeded,
        }
    );

    let history = h.ledger.history(1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(entitling_count(&history), 1);

    let payments = h.store.payments_for(1).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
    assert_eq!(payments[0].paid_at, Some(h.clock.now()));
    assert_eq!(payments[0].subscription_id, Some(subscription.id));
    assert!(payments[0].applied_at.is_some());
    assert!(payments[0].raw_payload.is_some());
}

#[tokio::test]
async fn test_failed_callback_leaves_subscriptions_alone() {
    let h = harness::<MemoryStore>();
    let trial = h.ledger.start_trial(1, Plan::Basic).await.unwrap();
    let payment = h.reconciler.record_pending_payment(1, Plan::Basic, 1990).await.unwrap();
    assert_eq!(payment.subscription_id, Some(trial.id));

    let outcome = h
        .reconciler
        .apply_callback(&payment.provider_ref, "failed", json!({"status": "failed"}), 1)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Failed { payment_id: payment.id });

    let payments = h.store.payments_for(1).await;
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(payments[0].paid_at, None);

    let current = h.ledger.current_entitlement(1).await.unwrap().unwrap();
    assert_eq!(current.id, trial.id);
    assert_eq!(current.status, SubscriptionStatus::Trialing);

    // A late success for a failed payment changes nothing
    let late = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 1)
        .await
        .unwrap();
    assert!(matches!(
        late,
        CallbackOutcome::AlreadyResolved { status: PaymentStatus::Failed, .. }
    ));
    assert_eq!(h.ledger.history(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_success_upgrades_referenced_trial_in_place() {
    let h = harness::<MemoryStore>();
    let trial = h.ledger.start_trial(1, Plan::Pro).await.unwrap();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    h.clock.advance(Duration::days(2));
    let outcome = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 1)
        .await
        .unwrap();

    match outcome {
        CallbackOutcome::Activated { subscription, .. } => {
            assert_eq!(subscription.id, trial.id);
            assert_eq!(subscription.status, SubscriptionStatus::Active);
            assert_eq!(subscription.started_at, trial.started_at);
            assert_eq!(subscription.renew_at, Some(h.clock.now() + Duration::days(30)));
        }
        other => panic!("expected activation, got {:?}", other),
    }
    assert_eq!(h.ledger.history(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_expiry_does_not_touch_paid_upgrade() {
    let h = harness::<MemoryStore>();
    let trial = h.ledger.start_trial(1, Plan::Pro).await.unwrap();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    h.reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 1)
        .await
        .unwrap();

    // A reader that saw the trial row lapse writes back after the upgrade.
    let lapsed_at = trial.trial_until.unwrap() + Duration::microseconds(1);
    assert!(!h.store.expire_subscription(trial.id, lapsed_at).await.unwrap());

    h.clock.set(lapsed_at);
    let current = h.ledger.current_entitlement(1).await.unwrap().unwrap();
    assert_eq!(current.id, trial.id);
    assert_eq!(current.status, SubscriptionStatus::Active);
    assert!(h.gate.has_access(1).await.unwrap());
}

#[tokio::test]
async fn test_expiry_write_back_requires_lapse() {
    let h = harness::<MemoryStore>();
    let paid = h.ledger.purchase(2, Plan::Basic).await.unwrap();
    let renew_at = paid.renew_at.unwrap();

    assert!(!h.store.expire_subscription(paid.id, renew_at).await.unwrap());
    assert!(h
        .store
        .expire_subscription(paid.id, renew_at + Duration::seconds(1))
        .await
        .unwrap());

    let history = h.ledger.history(2).await.unwrap();
    assert_eq!(history[0].status, SubscriptionStatus::Expired);
}

#[tokio::test]
async fn test_success_for_other_plan_replaces_trial() {
    let h = harness::<MemoryStore>();
    let trial = h.ledger.start_trial(1, Plan::Basic).await.unwrap();
    let payment = h.reconciler.record_pending_payment(1, Plan::Family, 5990).await.unwrap();

    h.reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 1)
        .await
        .unwrap();

    let history = h.ledger.history(1).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(entitling_count(&history), 1);
    assert_eq!(
        history.iter().find(|s| s.id == trial.id).unwrap().status,
        SubscriptionStatus::Canceled
    );
    assert_eq!(
        h.ledger.current_entitlement(1).await.unwrap().unwrap().plan,
        Plan::Family
    );
}

#[tokio::test]
async fn test_callback_for_missing_payment_is_not_found() {
    let h = harness::<MemoryStore>();

    let err = h
        .reconciler
        .apply_callback("no-such-ref", "succeeded", json!({}), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(ref r) if r == "no-such-ref"));

    assert!(h.store.payments_for(1).await.is_empty());
    assert!(h.ledger.history(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_callback_for_another_users_payment_is_not_found() {
    let h = harness::<MemoryStore>();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    let err = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)));

    let payments = h.store.payments_for(1).await;
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert!(!h.gate.has_access(2).await.unwrap());
}

#[tokio::test]
async fn test_unknown_status_mutates_nothing() {
    let h = harness::<MemoryStore>();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    let err = h
        .reconciler
        .apply_callback(&payment.provider_ref, "refunded", json!({}), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::UnknownStatus(ref s) if s == "refunded"));

    let payments = h.store.payments_for(1).await;
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert!(payments[0].raw_payload.is_none());
}

#[tokio::test]
async fn test_failed_activation_is_retried_on_redelivery() {
    let h = harness::<FlakyStore>();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    h.store.fail_activation.store(true, Ordering::SeqCst);
    let err = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BillingError::ActivationDeferred { payment_id, .. } if payment_id == payment.id
    ));

    // The charge is recorded even though access is not granted yet
    let recorded = h.store.inner.payments_for(1).await;
    assert_eq!(recorded[0].status, PaymentStatus::Succeeded);
    assert!(recorded[0].needs_activation());
    assert!(!h.gate.has_access(1).await.unwrap());

    h.store.fail_activation.store(false, Ordering::SeqCst);
    let retried = h
        .reconciler
        .apply_callback(&payment.provider_ref, "succeeded", json!({}), 1)
        .await
        .unwrap();
    assert!(matches!(retried, CallbackOutcome::Activated { .. }));
    assert!(h.gate.has_access(1).await.unwrap());
}

#[tokio::test]
async fn test_reconcile_unapplied_payments() {
    let h = harness::<FlakyStore>();
    let first = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();
    let second = h.reconciler.record_pending_payment(2, Plan::Basic, 1990).await.unwrap();

    h.store.fail_activation.store(true, Ordering::SeqCst);
    for (payment, owner) in [(&first, 1), (&second, 2)] {
        assert!(h
            .reconciler
            .apply_callback(&payment.provider_ref, "succeeded", json!({}), owner)
            .await
            .is_err());
    }

    let report = h.reconciler.reconcile_unapplied().await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.failed, 2);

    h.store.fail_activation.store(false, Ordering::SeqCst);
    let report = h.reconciler.reconcile_unapplied().await.unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 0);

    assert!(h.gate.has_access(1).await.unwrap());
    assert!(h.gate.has_access(2).await.unwrap());

    let report = h.reconciler.reconcile_unapplied().await.unwrap();
    assert_eq!(report, Default::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_purchases_leave_one_entitling_subscription() {
    let h = harness::<MemoryStore>();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let ledger = h.ledger.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger.purchase(1, Plan::Pro).await.map(|_| ())
                } else {
                    ledger.start_trial(1, Plan::Basic).await.map(|_| ())
                }
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(()) | Err(BillingError::Conflict(1)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let history = h.ledger.history(1).await.unwrap();
    assert!(history.len() >= 8);
    assert_eq!(entitling_count(&history), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_callbacks_activate_once() {
    let h = harness::<MemoryStore>();
    let payment = h.reconciler.record_pending_payment(1, Plan::Pro, 3990).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let reconciler = h.reconciler.clone();
            let provider_ref = payment.provider_ref.clone();
            tokio::spawn(async move {
                reconciler
                    .apply_callback(&provider_ref, "succeeded", json!({}), 1)
                    .await
            })
        })
        .collect();

    let outcomes: Vec<CallbackOutcome> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let activations = outcomes
        .iter()
        .filter(|o| matches!(o, CallbackOutcome::Activated { .. }))
        .count();
    assert_eq!(activations, 1);

    let history = h.ledger.history(1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SubscriptionStatus::Active);
}
