//! Configuration management for the API server
//!
//! Configuration comes from environment variables; a `.env` file is loaded
//! first when present.
//!
//! # Environment Variables
//!
//! - `API_HOST`: Host to bind to (default: 0.0.0.0)
//! - `API_PORT`: Port to bind to (default: 8080)
//! - `CORS_ORIGINS`: Comma separated origins, `*` for any (default: *)
//! - `APP_ENV`: `production` enables strict CORS (default: development)
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
//! - `JWT_SECRET`: Token signing secret, at least 32 characters (required)
//! - `JWT_ACCESS_TTL_MINUTES`: Access token lifetime (default: 60)
//! - `JWT_REFRESH_TTL_DAYS`: Refresh token lifetime (default: 14)
//! - `TRIAL_DAYS`: Trial length (default: 7)
//! - `BILLING_PERIOD_DAYS`: Paid period length (default: 30)
//! - `PAYMENT_CHECKOUT_URL`: Base URL of the provider checkout page
//!
//! # Example
//!
//! ```no_run
//! use sonara_api::config::Config;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! println!("Server will listen on {}", config.bind_address());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Minimum accepted signing secret length
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub billing: BillingConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Running with `APP_ENV=production`
    pub production: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Token configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Signing secret. Generate with `openssl rand -hex 32`.
    #[serde(skip_serializing)]
    pub secret: String,

    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_ttl_minutes", &self.access_ttl_minutes)
            .field("refresh_ttl_days", &self.refresh_ttl_days)
            .finish()
    }
}

/// Subscription and payment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub trial_days: i64,
    pub billing_period_days: i64,

    /// Provider checkout page; the provider reference is appended
    pub checkout_base_url: String,
}

impl Config {
    /// Loads configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does not
    /// parse. A missing `JWT_SECRET` is fatal.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {} characters long", MIN_JWT_SECRET_LEN);
        }

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let production = lookup("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let config = Self {
            api: ApiConfig {
                host: lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "API_PORT", 8080)?,
                cors_origins,
                production,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                access_ttl_minutes: parse_or(&lookup, "JWT_ACCESS_TTL_MINUTES", 60)?,
                refresh_ttl_days: parse_or(&lookup, "JWT_REFRESH_TTL_DAYS", 14)?,
            },
            billing: BillingConfig {
                trial_days: parse_or(&lookup, "TRIAL_DAYS", 7)?,
                billing_period_days: parse_or(&lookup, "BILLING_PERIOD_DAYS", 30)?,
                checkout_base_url: lookup("PAYMENT_CHECKOUT_URL")
                    .unwrap_or_else(|| "https://pay.sandbox.sonara.space/checkout".to_string()),
            },
        };

        if config.billing.trial_days <= 0 || config.billing.billing_period_days <= 0 {
            anyhow::bail!("TRIAL_DAYS and BILLING_PERIOD_DAYS must be positive");
        }

        Ok(config)
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
