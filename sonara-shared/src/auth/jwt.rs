//! Token service: issuing and verifying bearer credentials
//!
//! Access and refresh tokens are HS256-signed JWTs bound to one user
//! identity. Verification is pure: signature first, then structure, then
//! expiry against the injected [`Clock`].
//!
//! # Token Kinds
//!
//! - **Access Token**: Short-lived (default 1 hour), presented on every request
//! - **Refresh Token**: Long-lived (default 14 days), exchanged for access tokens
//!
//! # Clock Skew
//!
//! Issuance and verification share [`TOKEN_LEEWAY_SECS`] (zero): a token is
//! valid up to and including its `exp` second and rejected one second later.
//!
//! # Example
//!
//! ```
//! use sonara_shared::auth::jwt::{TokenKind, TokenService};
//! use sonara_shared::clock::SystemClock;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tokens = TokenService::new("a-signing-secret-of-at-least-32-bytes", Arc::new(SystemClock))?;
//!
//! let issued = tokens.issue_access_token(42)?;
//! let claim = tokens.verify(&issued.token, TokenKind::Access)?;
//! assert_eq!(claim.identity, 42);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::UserId;

/// Allowed clock skew, applied identically at issuance and verification
pub const TOKEN_LEEWAY_SECS: i64 = 0;

const ISSUER: &str = "sonara";

/// Error type for token operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Signing secret is absent or empty; fatal at startup
    #[error("JWT signing secret is missing")]
    MissingSecret,

    /// Failed to create token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Signature, encoding or claim structure is invalid
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// A token of the other kind was presented
    #[error("Expected {expected} token, got {actual} token")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
}

/// Token kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived token presented on requests
    Access,

    /// Long-lived token exchanged for access tokens
    Refresh,
}

impl TokenKind {
    /// Gets token kind as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed JWT claims
///
/// `sub` carries the decimal user id; everything else is standard except
/// `typ`, which distinguishes access from refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user id
    pub sub: String,

    /// Issuer - always "sonara"
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Token kind
    pub typ: TokenKind,
}

/// Verified claim set reconstructed from a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaim {
    pub identity: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub kind: TokenKind,
}

/// A freshly signed token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies access/refresh tokens with one process-wide secret
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Default access token lifetime
    pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 60;

    /// Default refresh token lifetime
    pub const DEFAULT_REFRESH_TTL_DAYS: i64 = 14;

    /// Creates a token service with default lifetimes
    ///
    /// # Errors
    ///
    /// Returns `JwtError::MissingSecret` if `secret` is empty or whitespace.
    pub fn new(secret: &str, clock: Arc<dyn Clock>) -> Result<Self, JwtError> {
        Self::with_lifetimes(
            secret,
            clock,
            Duration::minutes(Self::DEFAULT_ACCESS_TTL_MINUTES),
            Duration::days(Self::DEFAULT_REFRESH_TTL_DAYS),
        )
    }

    /// Creates a token service with explicit lifetimes
    ///
    /// # Errors
    ///
    /// Returns `JwtError::MissingSecret` for an empty secret and
    /// `JwtError::CreateError` if a lifetime is not positive or the access
    /// lifetime is not shorter than the refresh lifetime.
    pub fn with_lifetimes(
        secret: &str,
        clock: Arc<dyn Clock>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, JwtError> {
        if secret.trim().is_empty() {
            return Err(JwtError::MissingSecret);
        }
        if access_ttl <= Duration::zero() || refresh_ttl <= access_ttl {
            return Err(JwtError::CreateError(format!(
                "Invalid token lifetimes: access={}s refresh={}s",
                access_ttl.num_seconds(),
                refresh_ttl.num_seconds()
            )));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            clock,
            access_ttl,
            refresh_ttl,
        })
    }

    /// Lifetime for tokens of `kind`
    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// Issues an access token for `identity`
    pub fn issue_access_token(&self, identity: UserId) -> Result<IssuedToken, JwtError> {
        self.issue_at(identity, TokenKind::Access, self.clock.now())
    }

    /// Issues a refresh token for `identity`
    pub fn issue_refresh_token(&self, identity: UserId) -> Result<IssuedToken, JwtError> {
        self.issue_at(identity, TokenKind::Refresh, self.clock.now())
    }

    /// Issues a token of `kind` as if signed at `issued_at`
    pub fn issue_at(
        &self,
        identity: UserId,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedToken, JwtError> {
        let iat = issued_at.timestamp();
        let exp = iat + self.lifetime(kind).num_seconds();

        let claims = Claims {
            sub: identity.to_string(),
            iss: ISSUER.to_string(),
            iat,
            exp,
            nbf: iat,
            typ: kind,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))?;

        Ok(IssuedToken {
            token,
            expires_at: timestamp(exp)?,
        })
    }

    /// Verifies a token and requires it to be of `expected` kind
    ///
    /// No claim is read until the signature has been checked.
    ///
    /// # Errors
    ///
    /// - `JwtError::Malformed` for a bad signature, encoding, issuer or claim set
    /// - `JwtError::Expired` once the clock is past `exp` (plus leeway)
    /// - `JwtError::WrongKind` if the token is of the other kind
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<AccessClaim, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iat", "nbf", "sub", "iss"]);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| JwtError::Malformed(e.to_string()))?
            .claims;

        let identity: UserId = claims
            .sub
            .parse()
            .map_err(|_| JwtError::Malformed("subject is not a user id".to_string()))?;

        if claims.exp <= claims.iat {
            return Err(JwtError::Malformed("exp must be after iat".to_string()));
        }

        let now = self.clock.now().timestamp();
        if claims.nbf > now + TOKEN_LEEWAY_SECS {
            return Err(JwtError::Malformed("token is not valid yet".to_string()));
        }
        if now > claims.exp + TOKEN_LEEWAY_SECS {
            return Err(JwtError::Expired);
        }

        if claims.typ != expected {
            return Err(JwtError::WrongKind {
                expected,
                actual: claims.typ,
            });
        }

        Ok(AccessClaim {
            identity,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
            kind: claims.typ,
        })
    }

    /// Exchanges a valid refresh token for a new access token
    pub fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, JwtError> {
        let claim = self.verify(refresh_token, TokenKind::Refresh)?;
        self.issue_access_token(claim.identity)
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, JwtError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| JwtError::Malformed(format!("timestamp out of range: {}", secs)))
}
