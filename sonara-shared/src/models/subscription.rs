//! Subscription model and database operations
//!
//! # State Machine
//!
//! ```text
//! (none) ──trial──▶ trialing ──payment──▶ active ──cancel──▶ canceled
//!    │                 │                    │
//!    └──purchase──▶ active            renew expiry
//!                      │                    ▼
//!                 trial expiry           expired
//!                      ▼
//!                   expired
//! trialing ──cancel──▶ canceled
//! ```
//!
//! `trialing` and `active` are the entitling statuses. The partial unique
//! index `one_entitling_subscription_per_user` keeps at most one entitling row
//! per user.
//!
//! Expiry is lazy: a row can still read `active` after `renew_at` has passed.
//! Use [`Subscription::is_entitling_at`] rather than the raw status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::str::FromStr;

use crate::UserId;

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_plan", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Basic,
    Pro,
    Family,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Basic => "basic",
            Plan::Pro => "pro",
            Plan::Family => "family",
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a plan name is not one of `basic`, `pro`, `family`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            "family" => Ok(Plan::Family),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Free trial, bounded by `trial_until`
    Trialing,

    /// Paid period, bounded by `renew_at`
    Active,

    /// Ended by the user or replaced by a newer subscription
    Canceled,

    /// Boundary passed
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Whether this status grants premium access (before checking expiry)
    pub fn is_entitling(&self) -> bool {
        matches!(self, SubscriptionStatus::Trialing | SubscriptionStatus::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscription row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: UserId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub trial_until: Option<DateTime<Utc>>,
    pub renew_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// The instant after which this subscription stops entitling
    ///
    /// `trial_until` for trials, `renew_at` for paid periods, None otherwise.
    pub fn boundary(&self) -> Option<DateTime<Utc>> {
        match self.status {
            SubscriptionStatus::Trialing => self.trial_until,
            SubscriptionStatus::Active => self.renew_at,
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired => None,
        }
    }

    /// Whether the subscription grants access at `now`
    ///
    /// Still valid at the exact boundary instant.
    pub fn is_entitling_at(&self, now: DateTime<Utc>) -> bool {
        self.boundary().is_some_and(|boundary| now <= boundary)
    }

    /// Entitling by status but past its boundary
    pub fn has_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_entitling() && !self.is_entitling_at(now)
    }
}

/// Input for inserting a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub trial_until: Option<DateTime<Utc>>,
    pub renew_at: Option<DateTime<Utc>>,
}

impl NewSubscription {
    /// A trial starting at `now` and lasting `length`
    pub fn trial(user_id: UserId, plan: Plan, now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            user_id,
            plan,
            status: SubscriptionStatus::Trialing,
            started_at: now,
            trial_until: Some(now + length),
            renew_at: None,
        }
    }

    /// A paid period starting at `now` and lasting `period`
    pub fn active(user_id: UserId, plan: Plan, now: DateTime<Utc>, period: Duration) -> Self {
        Self {
            user_id,
            plan,
            status: SubscriptionStatus::Active,
            started_at: now,
            trial_until: None,
            renew_at: Some(now + period),
        }
    }
}

/// Name of the partial unique index guarding one entitling row per user
pub const ONE_ENTITLING_INDEX: &str = "one_entitling_subscription_per_user";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, started_at, trial_until, \
                                    renew_at, canceled_at, created_at, updated_at";

/// Most recent subscription in an entitling status, lapsed or not
pub async fn latest_entitling(
    conn: &mut PgConnection,
    user_id: UserId,
) -> Result<Option<Subscription>, sqlx::Error> {
    let query = format!(
        r#"
        SELECT {SUBSCRIPTION_COLUMNS}
        FROM subscriptions
        WHERE user_id = $1 AND status IN ('trialing', 'active')
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#
    );

    sqlx::query_as::<_, Subscription>(&query)
        .bind(user_id)
        .fetch_optional(conn)
        .await
}

/// All subscriptions for a user, newest first
pub async fn list_for_user(
    conn: &mut PgConnection,
    user_id: UserId,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let query = format!(
        r#"
        SELECT {SUBSCRIPTION_COLUMNS}
        FROM subscriptions
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        "#
    );

    sqlx::query_as::<_, Subscription>(&query)
        .bind(user_id)
        .fetch_all(conn)
        .await
}

/// Inserts a subscription
///
/// Fails on [`ONE_ENTITLING_INDEX`] if an entitling row already exists.
pub async fn insert(
    conn: &mut PgConnection,
    new: &NewSubscription,
    now: DateTime<Utc>,
) -> Result<Subscription, sqlx::Error> {
    let query = format!(
        r#"
        INSERT INTO subscriptions
            (user_id, plan, status, started_at, trial_until, renew_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Subscription>(&query)
        .bind(new.user_id)
        .bind(new.plan)
        .bind(new.status)
        .bind(new.started_at)
        .bind(new.trial_until)
        .bind(new.renew_at)
        .bind(now)
        .fetch_one(conn)
        .await
}

/// Moves every lapsed entitling row of a user to `expired`
///
/// Returns the number of rows retired.
pub async fn expire_lapsed(
    conn: &mut PgConnection,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'expired', updated_at = $2
        WHERE user_id = $1
          AND ((status = 'trialing' AND trial_until < $2)
            OR (status = 'active' AND renew_at < $2))
        "#,
    )
    .bind(user_id)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Moves one subscription to `expired` if it has lapsed at `now`
///
/// A row that was renewed or upgraded since it was read is left alone.
pub async fn mark_expired(
    conn: &mut PgConnection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'expired', updated_at = $2
        WHERE id = $1
          AND ((status = 'trialing' AND trial_until < $2)
            OR (status = 'active' AND renew_at < $2))
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Cancels every entitling row of a user, returning the rows changed
///
/// Call [`expire_lapsed`] first so that only live rows end up `canceled`.
pub async fn cancel_entitling(
    conn: &mut PgConnection,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let query = format!(
        r#"
        UPDATE subscriptions
        SET status = 'canceled', canceled_at = $2, updated_at = $2
        WHERE user_id = $1 AND status IN ('trialing', 'active')
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Subscription>(&query)
        .bind(user_id)
        .bind(now)
        .fetch_all(conn)
        .await
}

/// Converts a trial into a paid period in place
///
/// Returns None if the row is no longer `trialing`.
pub async fn activate_trial(
    conn: &mut PgConnection,
    id: i64,
    renew_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Subscription>, sqlx::Error> {
    let query = format!(
        r#"
        UPDATE subscriptions
        SET status = 'active', renew_at = $2, updated_at = $3
        WHERE id = $1 AND status = 'trialing'
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Subscription>(&query)
        .bind(id)
        .bind(renew_at)
        .bind(now)
        .fetch_optional(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn row(new: NewSubscription) -> Subscription {
        Subscription {
            id: 1,
            user_id: new.user_id,
            plan: new.plan,
            status: new.status,
            started_at: new.started_at,
            trial_until: new.trial_until,
            renew_at: new.renew_at,
            canceled_at: None,
            created_at: new.started_at,
            updated_at: new.started_at,
        }
    }

    #[test]
    fn test_plan_parsing() {
        assert_eq!("basic".parse::<Plan>(), Ok(Plan::Basic));
        assert_eq!("pro".parse::<Plan>(), Ok(Plan::Pro));
        assert_eq!("family".parse::<Plan>(), Ok(Plan::Family));
        assert_eq!("Pro".parse::<Plan>(), Err(UnknownPlan("Pro".to_string())));
        assert!("enterprise".parse::<Plan>().is_err());
    }

    #[test]
    fn test_entitling_statuses() {
        assert!(SubscriptionStatus::Trialing.is_entitling());
        assert!(SubscriptionStatus::Active.is_entitling());
        assert!(!SubscriptionStatus::Canceled.is_entitling());
        assert!(!SubscriptionStatus::Expired.is_entitling());
    }

    #[test]
    fn test_trial_boundary_is_inclusive() {
        let sub = row(NewSubscription::trial(1, Plan::Pro, start(), Duration::days(7)));
        let boundary = start() + Duration::days(7);

        assert_eq!(sub.boundary(), Some(boundary));
        assert!(sub.is_entitling_at(boundary));
        assert!(!sub.is_entitling_at(boundary + Duration::microseconds(1)));
        assert!(sub.has_lapsed_at(boundary + Duration::seconds(1)));
    }

    #[test]
    fn test_active_boundary_uses_renew_at() {
        let sub = row(NewSubscription::active(1, Plan::Basic, start(), Duration::days(30)));
        assert_eq!(sub.boundary(), Some(start() + Duration::days(30)));
        assert_eq!(sub.trial_until, None);
        assert!(sub.is_entitling_at(start()));
    }

    #[test]
    fn test_canceled_never_entitles() {
        let mut sub = row(NewSubscription::active(1, Plan::Basic, start(), Duration::days(30)));
        sub.status = SubscriptionStatus::Canceled;
        assert!(!sub.is_entitling_at(start()));
        assert!(!sub.has_lapsed_at(start() + Duration::days(60)));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(SubscriptionStatus::Trialing).unwrap(), "trialing");
        assert_eq!(serde_json::to_value(Plan::Family).unwrap(), "family");
    }
}
