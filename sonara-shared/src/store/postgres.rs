//! PostgreSQL storage backend
//!
//! Each billing mutation runs in one transaction that first takes
//! `pg_advisory_xact_lock(user_id)`, so concurrent requests for the same user
//! run one after another while different users proceed in parallel. The
//! partial unique index on entitling subscriptions backs this up and surfaces
//! as [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::{Activation, BillingStore, StoreError, UserStore};
use crate::db::pool::health_check;
use crate::models::payment::{self, NewPayment, Payment, PaymentStatus};
use crate::models::subscription::{self, NewSubscription, Subscription, SubscriptionStatus};
use crate::models::user::{CreateUser, User};
use crate::UserId;

/// Storage backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Serializes billing mutations for one user until the transaction ends
async fn lock_owner(conn: &mut PgConnection, owner: UserId) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(owner)
        .execute(conn)
        .await?;
    Ok(())
}

/// Expires lapsed rows, cancels live ones, inserts `new`
async fn retire_and_insert(
    conn: &mut PgConnection,
    new: &NewSubscription,
    now: DateTime<Utc>,
) -> Result<Subscription, sqlx::Error> {
    let expired = subscription::expire_lapsed(&mut *conn, new.user_id, now).await?;
    let canceled = subscription::cancel_entitling(&mut *conn, new.user_id, now).await?;
    debug!(
        user_id = new.user_id,
        expired,
        canceled = canceled.len(),
        "Retired entitling subscriptions"
    );

    subscription::insert(conn, new, now).await
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, data: CreateUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        Ok(User::create(&self.pool, data, now).await?)
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_id(&self.pool, id).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_email(&self.pool, email).await?)
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if User::update_last_login(&self.pool, id, at).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound("user"))
        }
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn latest_entitling(&self, owner: UserId) -> Result<Option<Subscription>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(subscription::latest_entitling(&mut conn, owner).await?)
    }

    async fn list_subscriptions(&self, owner: UserId) -> Result<Vec<Subscription>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(subscription::list_for_user(&mut conn, owner).await?)
    }

    async fn insert_exclusive(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, new.user_id).await?;

        subscription::expire_lapsed(&mut tx, new.user_id, now).await?;
        if subscription::latest_entitling(&mut tx, new.user_id).await?.is_some() {
            return Err(StoreError::Conflict);
        }

        let created = subscription::insert(&mut tx, &new, now).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn replace_entitling(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, new.user_id).await?;

        let created = retire_and_insert(&mut tx, &new, now).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn cancel_entitling(
        &self,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, owner).await?;

        subscription::expire_lapsed(&mut tx, owner, now).await?;
        let canceled = subscription::cancel_entitling(&mut tx, owner, now).await?;
        tx.commit().await?;

        Ok(canceled.into_iter().next())
    }

    async fn expire_subscription(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(subscription::mark_expired(&mut conn, id, now).await?)
    }

    async fn insert_payment(
        &self,
        new: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Payment, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payment::insert(&mut conn, &new, now).await?)
    }

    async fn find_payment_by_ref(&self, provider_ref: &str) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payment::find_by_provider_ref(&mut conn, provider_ref).await?)
    }

    async fn resolve_payment(
        &self,
        id: i64,
        status: PaymentStatus,
        raw_payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payment::resolve(&mut conn, id, status, &raw_payload, now).await?)
    }

    async fn apply_payment(
        &self,
        payment_id: i64,
        renew_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Activation, StoreError> {
        let mut tx = self.pool.begin().await?;

        let paid = payment::find_by_id_for_update(&mut tx, payment_id)
            .await?
            .ok_or(StoreError::NotFound("payment"))?;
        if !paid.needs_activation() {
            return Ok(Activation::Skipped);
        }

        lock_owner(&mut tx, paid.user_id).await?;

        let current = subscription::latest_entitling(&mut tx, paid.user_id).await?;
        let upgradable = current.filter(|sub| {
            paid.subscription_id == Some(sub.id)
                && sub.status == SubscriptionStatus::Trialing
                && sub.plan == paid.plan
                && sub.is_entitling_at(now)
        });

        let activated = match upgradable {
            Some(trial) => subscription::activate_trial(&mut tx, trial.id, renew_at, now).await?,
            None => None,
        };
        let activated = match activated {
            Some(sub) => sub,
            None => {
                let new = NewSubscription {
                    user_id: paid.user_id,
                    plan: paid.plan,
                    status: SubscriptionStatus::Active,
                    started_at: now,
                    trial_until: None,
                    renew_at: Some(renew_at),
                };
                retire_and_insert(&mut tx, &new, now).await?
            }
        };

        payment::mark_applied(&mut tx, paid.id, activated.id, now).await?;
        tx.commit().await?;

        Ok(Activation::Applied(activated))
    }

    async fn unapplied_payments(&self) -> Result<Vec<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payment::list_unapplied(&mut conn).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(health_check(&self.pool).await?)
    }
}
