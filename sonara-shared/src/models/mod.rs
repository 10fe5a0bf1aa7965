//! Database models for Sonara
//!
//! Each model owns its row type and the SQL that reads and writes it. Query
//! functions take an explicit connection so that callers can compose them
//! inside one transaction.
//!
//! # Models
//!
//! - `user`: Identities and their credentials
//! - `subscription`: Plans, subscription statuses and the subscription row
//! - `payment`: Payments awaiting or carrying a provider outcome

pub mod payment;
pub mod subscription;
pub mod user;
