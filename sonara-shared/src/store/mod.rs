//! Storage capabilities
//!
//! The ledger, reconciler and HTTP handlers never hold a database handle
//! directly. They receive an `Arc<dyn UserStore>` / `Arc<dyn BillingStore>` at
//! construction, so the same code runs against PostgreSQL in production and
//! against [`MemoryStore`] in tests.
//!
//! Every [`BillingStore`] mutation is atomic and serialized per user: the
//! PostgreSQL backend takes a transaction-scoped advisory lock keyed by the
//! user id, the memory backend holds one mutex for the whole operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::subscription::{NewSubscription, Subscription, ONE_ENTITLING_INDEX};
use crate::models::user::{CreateUser, User};
use crate::UserId;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The user already holds a live entitling subscription
    #[error("an entitling subscription already exists")]
    Conflict,

    /// A unique value is already taken
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// A referenced row does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Any other database failure
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.constraint() {
                Some(ONE_ENTITLING_INDEX) => return StoreError::Conflict,
                Some("users_email_key") => return StoreError::Duplicate("email"),
                Some("payments_provider_ref_key") => return StoreError::Duplicate("provider_ref"),
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Outcome of [`BillingStore::apply_payment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The payment's subscription activation committed now
    Applied(Subscription),

    /// Payment was already applied or did not succeed; nothing changed
    Skipped,
}

/// Identity persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `StoreError::Duplicate("email")` if the email is taken
    async fn create_user(&self, data: CreateUser, now: DateTime<Utc>) -> Result<User, StoreError>;

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Subscription and payment persistence
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Most recent entitling-status row, without evaluating expiry
    async fn latest_entitling(&self, owner: UserId) -> Result<Option<Subscription>, StoreError>;

    /// Every subscription of `owner`, newest first
    async fn list_subscriptions(&self, owner: UserId) -> Result<Vec<Subscription>, StoreError>;

    /// Inserts `new` unless a live entitling row exists
    ///
    /// Lapsed entitling rows are moved to `expired` first. Fails with
    /// `StoreError::Conflict` if a live one remains.
    async fn insert_exclusive(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError>;

    /// Retires any entitling row and inserts `new`, as one atomic step
    ///
    /// Live rows become `canceled` with `canceled_at = now`; lapsed rows
    /// become `expired`.
    async fn replace_entitling(
        &self,
        new: NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError>;

    /// Cancels the live entitling row, if any
    async fn cancel_entitling(
        &self,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Persists a lazily observed expiry
    ///
    /// Only a row that has lapsed at `now` changes; false if it had moved on
    /// or been renewed since it was read.
    async fn expire_subscription(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Fails with `StoreError::Duplicate("provider_ref")` on a reused reference
    async fn insert_payment(
        &self,
        new: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Payment, StoreError>;

    async fn find_payment_by_ref(&self, provider_ref: &str) -> Result<Option<Payment>, StoreError>;

    /// Moves a pending payment to `status`
    ///
    /// Returns None if the payment was no longer pending.
    async fn resolve_payment(
        &self,
        id: i64,
        status: PaymentStatus,
        raw_payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, StoreError>;

    /// Activates the subscription paid for by a succeeded payment
    ///
    /// In one atomic step: if the payment references its owner's live trial
    /// of the same plan, the trial becomes `active` with `renew_at`; otherwise
    /// any entitling row is retired and a new `active` row inserted. The
    /// payment is then stamped `applied_at`. A payment that is already applied
    /// (or not succeeded) yields [`Activation::Skipped`].
    async fn apply_payment(
        &self,
        payment_id: i64,
        renew_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Activation, StoreError>;

    /// Succeeded payments whose activation never committed
    async fn unapplied_payments(&self) -> Result<Vec<Payment>, StoreError>;

    /// Cheap connectivity probe
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_constraint_errors_stay_database_errors() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Database(sqlx::Error::RowNotFound)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Database(_)
        ));
    }
}
