//! Request guards layered onto route groups
//!
//! - `session`: verifies the bearer token and attaches an `AuthContext`
//! - `entitlement`: admits only callers with a live subscription

pub mod entitlement;
pub mod session;
