//! Credential store: Argon2id password hashing and verification
//!
//! Passwords are salted and hashed one way. A stored credential is only ever
//! compared against a candidate password, never decoded.
//!
//! # Parameters
//!
//! - **Algorithm**: Argon2id, version 0x13
//! - **Memory**: 19 MiB (19456 KiB)
//! - **Iterations**: 2 passes
//! - **Parallelism**: 1 lane
//! - **Salt**: 16 random bytes from the OS RNG
//!
//! Verification reads the parameters embedded in the PHC string, so hashes
//! created with older parameters keep verifying.
//!
//! # Example
//!
//! ```
//! use sonara_shared::auth::password::{hash_password, verify_password};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = hash_password("correct horse battery staple")?;
//! assert!(verify_password("correct horse battery staple", &hash)?);
//! assert!(!verify_password("Tr0ub4dor&3", &hash)?);
//! # Ok(())
//! # }
//! ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};
use std::sync::OnceLock;

/// Error type for password hashing operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Failed to verify password
    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    /// Stored hash is not a valid PHC string
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

fn hasher() -> Result<Argon2<'static>, PasswordError> {
    let params = ParamsBuilder::new()
        .m_cost(19_456)
        .t_cost(2)
        .p_cost(1)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

    Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a password into a PHC string
///
/// Example output:
/// ```text
/// $argon2id$v=19$m=19456,t=2,p=1$<salt>$<hash>
/// ```
///
/// # Errors
///
/// Returns `PasswordError::HashError` if hashing fails
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Compares a plaintext password with a stored hash
///
/// Returns `Ok(false)` on mismatch. The comparison is constant time.
///
/// # Errors
///
/// Returns `PasswordError::InvalidHash` if the stored hash cannot be parsed and
/// `PasswordError::VerifyError` for any other verifier failure.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
    }
}

/// Burns one verification against a fixed hash and always reports a mismatch
///
/// Login calls this when the email is unknown so that an unknown account and
/// a wrong password take the same time to reject.
pub fn verify_against_dummy(password: &str) -> Result<bool, PasswordError> {
    static DUMMY: OnceLock<String> = OnceLock::new();

    let dummy = match DUMMY.get() {
        Some(hash) => hash,
        None => {
            let hash = hash_password("sonara-dummy-credential")?;
            DUMMY.get_or_init(|| hash)
        }
    };

    verify_password(password, dummy)?;
    Ok(false)
}
