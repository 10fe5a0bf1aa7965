//! # Sonara Shared Library
//!
//! This crate contains the authentication, subscription and payment core used
//! by the Sonara API server.
//!
//! ## Module Organization
//!
//! - `auth`: Password hashing, token service and session context
//! - `billing`: Subscription ledger, payment reconciliation and entitlement gate
//! - `clock`: Injectable time source
//! - `db`: Connection pool and migrations
//! - `models`: Database models and their SQL
//! - `store`: Storage capability traits with PostgreSQL and in-memory backends

pub mod auth;
pub mod billing;
pub mod clock;
pub mod db;
pub mod models;
pub mod store;

/// Opaque numeric user identity.
pub type UserId = i64;

/// Current version of the Sonara shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
