//! Authentication utilities
//!
//! # Modules
//!
//! - [`password`]: Argon2id credential hashing and verification
//! - [`jwt`]: Access/refresh token issuance and verification
//! - [`middleware`]: Bearer header to [`middleware::AuthContext`] propagation
//!
//! # Example
//!
//! ```no_run
//! use sonara_shared::auth::jwt::{TokenKind, TokenService};
//! use sonara_shared::auth::password::{hash_password, verify_password};
//! use sonara_shared::clock::SystemClock;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = hash_password("user_password")?;
//! assert!(verify_password("user_password", &hash)?);
//!
//! let tokens = TokenService::new(&std::env::var("JWT_SECRET")?, Arc::new(SystemClock))?;
//! let issued = tokens.issue_access_token(1)?;
//! tokens.verify(&issued.token, TokenKind::Access)?;
//! # Ok(())
//! # }
//! ```

pub mod jwt;
pub mod middleware;
pub mod password;
