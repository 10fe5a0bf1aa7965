use crate::store::StoreError;
use crate::UserId;

/// Error type for subscription and payment operations
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// A live entitling subscription already exists
    #[error("user {0} already has an entitling subscription")]
    Conflict(UserId),

    /// No payment matches the callback reference for this user
    #[error("no payment matches reference {0}")]
    NotFound(String),

    /// Callback status other than `succeeded` or `failed`
    #[error("unknown payment status: {0}")]
    UnknownStatus(String),

    /// Payment amounts are positive minor units
    #[error("payment amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// The charge is recorded as succeeded but the subscription was not
    /// activated; the payment stays unapplied and will be retried
    #[error("payment {payment_id} succeeded but activation is deferred: {source}")]
    ActivationDeferred {
        payment_id: i64,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
