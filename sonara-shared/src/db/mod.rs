//! Database layer for Sonara
//!
//! - `pool`: PostgreSQL connection pool with a startup ping
//! - `migrations`: Embedded migration runner
//!
//! Row types and their SQL live in [`crate::models`].

pub mod migrations;
pub mod pool;
