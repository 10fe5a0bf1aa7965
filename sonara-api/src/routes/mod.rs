/// API route handlers
///
/// Organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Registration, login and token refresh
/// - `users`: The caller's profile
/// - `subscriptions`: Trial, purchase, cancel and current entitlement
/// - `payments`: Pending payments and the provider callback
/// - `premium`: Subscription-gated content

pub mod auth;
pub mod health;
pub mod payments;
pub mod premium;
pub mod subscriptions;
pub mod users;
