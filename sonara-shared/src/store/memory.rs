//! In-process storage backend
//!
//! Holds every table behind one `tokio::sync::Mutex`; each trait method runs
//! to completion under the lock, which gives the same per-user atomicity as
//! the PostgreSQL backend. Used by the test suites and for local runs without
//! a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use super::{Activation, BillingStore, StoreError, UserStore};
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::subscription::{NewSubscription, Subscription, SubscriptionStatus};
use crate::models::user::{CreateUser, User, DEFAULT_LOCALE};
use crate::UserId;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    subscriptions: Vec<Subscription>,
    payments: Vec<Payment>,
    next_user_id: i64,
    next_subscription_id: i64,
    next_payment_id: i64,
}

impl Tables {
    fn latest_entitling(&self, owner: UserId) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.user_id == owner && s.status.is_entitling())
            .max_by_key(|s| (s.created_at, s.id))
    }

    fn expire_lapsed(&mut self, owner: UserId, now: DateTime<Utc>) {
        for sub in self.subscriptions.iter_mut() {
            if sub.user_id == owner && sub.has_lapsed_at(now) {
                sub.status = SubscriptionStatus::Expired;
                sub.updated_at = now;
            }
        }
    }

    fn cancel_entitling(&mut self, owner: UserId, now: DateTime<Utc>) -> Option<Subscription> {
        let mut canceled = None;
        for sub in self.subscriptions.iter_mut() {
            if sub.user_id == owner && sub.status.is_entitling() {
                sub.status = SubscriptionStatus::Canceled;
                sub.canceled_at = Some(now);
                sub.updated_at = now;
                canceled = Some(sub.clone());
            }
        }
        canceled
    }

    fn insert_subscription(
        &mut self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        if new.status.is_entitling() && self.latest_entitling(new.user_id).is_some() {
            return Err(StoreError::Conflict);
        }

        self.next_subscription_id += 1;
        let sub = Subscription {
            id: self.next_subscription_id,
            user_id: new.user_id,
            plan: new.plan,
            status: new.status,
            started_at: new.started_at,
            trial_until: new.trial_until,
            renew_at: new.renew_at,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.push(sub.clone());
        Ok(sub)
    }

    fn retire_and_insert(
        &mut self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        self.expire_lapsed(new.user_id, now);
        self.cancel_entitling(new.user_id, now);
        self.insert_subscription(new, now)
    }
}

/// Storage held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every payment of `owner`, oldest first
    pub async fn payments_for(&self, owner: UserId) -> Vec<Payment> {
        let tables = self.tables.lock().await;
        tables
            .payments
            .iter()
            .filter(|p| p.user_id == owner)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, data: CreateUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let email = User::normalize_email(&data.email);
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Duplicate("email"));
        }

        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            email,
            password_hash: data.password_hash,
            first_name: data.first_name,
            last_name: data.last_name,
            locale: data.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = User::normalize_email(email);
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound("user"))?;
        user.last_login_at = Some(at);
        user.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn latest_entitling(&self, owner: UserId) -> Result<Option<Subscription>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.latest_entitling(owner).cloned())
    }

    async fn list_subscriptions(&self, owner: UserId) -> Result<Vec<Subscription>, StoreError> {
        let tables = self.tables.lock().await;
        let mut subs: Vec<Subscription> = tables
            .subscriptions
            .iter()
            .filter(|s| s.user_id == owner)
            .cloned()
            .collect();
        subs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(subs)
    }

    async fn insert_exclusive(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.expire_lapsed(new.user_id, now);
        tables.insert_subscription(new, now)
    }

    async fn replace_entitling(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.retire_and_insert(new, now)
    }

    async fn cancel_entitling(
        &self,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.expire_lapsed(owner, now);
        Ok(tables.cancel_entitling(owner, now))
    }

    async fn expire_subscription(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id && s.has_lapsed_at(now))
        {
            Some(sub) => {
                sub.status = SubscriptionStatus::Expired;
                sub.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_payment(
        &self,
        new: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Payment, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.payments.iter().any(|p| p.provider_ref == new.provider_ref) {
            return Err(StoreError::Duplicate("provider_ref"));
        }

        tables.next_payment_id += 1;
        let payment = Payment {
            id: tables.next_payment_id,
            user_id: new.user_id,
            subscription_id: new.subscription_id,
            plan: new.plan,
            provider_ref: new.provider_ref,
            amount: new.amount,
            status: PaymentStatus::Pending,
            raw_payload: None,
            created_at: now,
            paid_at: None,
            applied_at: None,
        };
        tables.payments.push(payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_ref(&self, provider_ref: &str) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.provider_ref == provider_ref)
            .cloned())
    }

    async fn resolve_payment(
        &self,
        id: i64,
        status: PaymentStatus,
        raw_payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(payment) = tables
            .payments
            .iter_mut()
            .find(|p| p.id == id && p.status == PaymentStatus::Pending)
        else {
            return Ok(None);
        };

        payment.status = status;
        payment.raw_payload = Some(raw_payload);
        payment.paid_at = (status == PaymentStatus::Succeeded).then_some(now);
        Ok(Some(payment.clone()))
    }

    async fn apply_payment(
        &self,
        payment_id: i64,
        renew_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Activation, StoreError> {
        let mut tables = self.tables.lock().await;

        let paid = tables
            .payments
            .iter()
            .find(|p| p.id == payment_id)
            .cloned()
            .ok_or(StoreError::NotFound("payment"))?;
        if !paid.needs_activation() {
            return Ok(Activation::Skipped);
        }

        let upgradable = tables
            .latest_entitling(paid.user_id)
            .filter(|sub| {
                paid.subscription_id == Some(sub.id)
                    && sub.status == SubscriptionStatus::Trialing
                    && sub.plan == paid.plan
                    && sub.is_entitling_at(now)
            })
            .map(|sub| sub.id)
            .and_then(|id| tables.subscriptions.iter().position(|s| s.id == id));

        let activated = match upgradable {
            Some(idx) => {
                let trial = &mut tables.subscriptions[idx];
                trial.status = SubscriptionStatus::Active;
                trial.renew_at = Some(renew_at);
                trial.updated_at = now;
                trial.clone()
            }
            None => {
                let new = NewSubscription {
                    user_id: paid.user_id,
                    plan: paid.plan,
                    status: SubscriptionStatus::Active,
                    started_at: now,
                    trial_until: None,
                    renew_at: Some(renew_at),
                };
                tables.retire_and_insert(new, now)?
            }
        };

        if let Some(payment) = tables.payments.iter_mut().find(|p| p.id == payment_id) {
            payment.subscription_id = Some(activated.id);
            payment.applied_at = Some(now);
        }

        Ok(Activation::Applied(activated))
    }

    async fn unapplied_payments(&self) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.needs_activation())
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
