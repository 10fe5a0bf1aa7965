//! Payment model and database operations
//!
//! A payment is recorded `pending` before the user is sent to the provider and
//! resolved exactly once by a provider callback:
//!
//! ```text
//! pending ──succeeded──▶ succeeded ──(activation)──▶ applied_at set
//!    └──────failed─────▶ failed
//! ```
//!
//! Resolution is a single guarded update (`WHERE status = 'pending'`), so a
//! redelivered callback finds nothing to update. A succeeded payment whose
//! subscription activation has not yet committed keeps `applied_at` NULL and is
//! picked up again by reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgConnection;

use super::subscription::Plan;
use crate::UserId;

/// Payment outcome as recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Succeeded and failed are final
    pub fn is_resolved(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: i64,
    pub user_id: UserId,

    /// Subscription this payment is meant to (re)activate, if one existed
    pub subscription_id: Option<i64>,

    pub plan: Plan,

    /// Reference the provider echoes back in its callback
    pub provider_ref: String,

    /// Amount in minor currency units
    pub amount: i64,

    pub status: PaymentStatus,

    /// Callback body as received
    pub raw_payload: Option<JsonValue>,

    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,

    /// When the subscription activation for this payment committed
    pub applied_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Succeeded but its subscription activation never committed
    pub fn needs_activation(&self) -> bool {
        self.status == PaymentStatus::Succeeded && self.applied_at.is_none()
    }
}

/// Input for recording a pending payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub user_id: UserId,
    pub subscription_id: Option<i64>,
    pub plan: Plan,
    pub provider_ref: String,
    pub amount: i64,
}

const PAYMENT_COLUMNS: &str = "id, user_id, subscription_id, plan, provider_ref, amount, status, \
                               raw_payload, created_at, paid_at, applied_at";

/// Inserts a pending payment
pub async fn insert(
    conn: &mut PgConnection,
    new: &NewPayment,
    now: DateTime<Utc>,
) -> Result<Payment, sqlx::Error> {
    let query = format!(
        r#"
        INSERT INTO payments (user_id, subscription_id, plan, provider_ref, amount, status, created_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6)
        RETURNING {PAYMENT_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Payment>(&query)
        .bind(new.user_id)
        .bind(new.subscription_id)
        .bind(new.plan)
        .bind(&new.provider_ref)
        .bind(new.amount)
        .bind(now)
        .fetch_one(conn)
        .await
}

/// Finds a payment by ID and locks the row until the transaction ends
pub async fn find_by_id_for_update(
    conn: &mut PgConnection,
    id: i64,
) -> Result<Option<Payment>, sqlx::Error> {
    let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");

    sqlx::query_as::<_, Payment>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Finds a payment by provider reference
pub async fn find_by_provider_ref(
    conn: &mut PgConnection,
    provider_ref: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_ref = $1");

    sqlx::query_as::<_, Payment>(&query)
        .bind(provider_ref)
        .fetch_optional(conn)
        .await
}

/// Resolves a pending payment
///
/// `paid_at` is set only for `succeeded`. Returns None if the payment was no
/// longer pending, which makes a redelivered callback a no-op.
pub async fn resolve(
    conn: &mut PgConnection,
    id: i64,
    status: PaymentStatus,
    raw_payload: &JsonValue,
    now: DateTime<Utc>,
) -> Result<Option<Payment>, sqlx::Error> {
    let paid_at = (status == PaymentStatus::Succeeded).then_some(now);
    let query = format!(
        r#"
        UPDATE payments
        SET status = $2, raw_payload = $3, paid_at = $4
        WHERE id = $1 AND status = 'pending'
        RETURNING {PAYMENT_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Payment>(&query)
        .bind(id)
        .bind(status)
        .bind(raw_payload)
        .bind(paid_at)
        .fetch_optional(conn)
        .await
}

/// Records that activation for a succeeded payment committed
pub async fn mark_applied(
    conn: &mut PgConnection,
    id: i64,
    subscription_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<Payment>, sqlx::Error> {
    let query = format!(
        r#"
        UPDATE payments
        SET subscription_id = $2, applied_at = $3
        WHERE id = $1 AND status = 'succeeded' AND applied_at IS NULL
        RETURNING {PAYMENT_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Payment>(&query)
        .bind(id)
        .bind(subscription_id)
        .bind(now)
        .fetch_optional(conn)
        .await
}

/// Succeeded payments whose activation never committed, oldest first
pub async fn list_unapplied(conn: &mut PgConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let query = format!(
        r#"
        SELECT {PAYMENT_COLUMNS}
        FROM payments
        WHERE status = 'succeeded' AND applied_at IS NULL
        ORDER BY id
        "#
    );

    sqlx::query_as::<_, Payment>(&query).fetch_all(conn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution() {
        assert!(!PaymentStatus::Pending.is_resolved());
        assert!(PaymentStatus::Succeeded.is_resolved());
        assert!(PaymentStatus::Failed.is_resolved());
    }

    #[test]
    fn test_needs_activation() {
        let mut payment = Payment {
            id: 1,
            user_id: 1,
            subscription_id: None,
            plan: Plan::Pro,
            provider_ref: "ref".to_string(),
            amount: 3990,
            status: PaymentStatus::Pending,
            raw_payload: None,
            created_at: Utc::now(),
            paid_at: None,
            applied_at: None,
        };
        assert!(!payment.needs_activation());

        payment.status = PaymentStatus::Succeeded;
        assert!(payment.needs_activation());

        payment.applied_at = Some(Utc::now());
        assert!(!payment.needs_activation());
    }
}
