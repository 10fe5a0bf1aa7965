//! User model and database operations
//!
//! A user is the identity root: subscriptions and payments hang off it. Ids are
//! assigned by the database and never change.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE users (
//!     id BIGSERIAL PRIMARY KEY,
//!     email VARCHAR(255) NOT NULL,
//!     password_hash VARCHAR(255) NOT NULL,
//!     first_name VARCHAR(100),
//!     last_name VARCHAR(100),
//!     locale VARCHAR(16) NOT NULL DEFAULT 'en',
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     last_login_at TIMESTAMPTZ,
//!     CONSTRAINT users_email_key UNIQUE (email)
//! );
//! ```
//!
//! Emails are stored lowercased; use [`User::normalize_email`] before any
//! insert or lookup.
//!
//! # Example
//!
//! ```no_run
//! use sonara_shared::models::user::{CreateUser, User};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
//! let now = chrono::Utc::now();
//! let user = User::create(&pool, CreateUser {
//!     email: User::normalize_email("Ada@Example.com"),
//!     password_hash: "$argon2id$...".to_string(),
//!     first_name: Some("Ada".to_string()),
//!     last_name: Some("Lovelace".to_string()),
//!     locale: None,
//! }, now).await?;
//!
//! let found = User::find_by_email(&pool, "ada@example.com").await?;
//! assert_eq!(found.map(|u| u.id), Some(user.id));
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::UserId;

/// Locale assigned when registration does not provide one
pub const DEFAULT_LOCALE: &str = "en";

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,

    /// Lowercased email address, unique across users
    pub email: String,

    /// Argon2id PHC string, never sent to clients
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub locale: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// None until the first successful login
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Email address, already normalized
    pub email: String,

    /// Argon2id password hash (not the plaintext password)
    pub password_hash: String,

    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Falls back to [`DEFAULT_LOCALE`]
    pub locale: Option<String>,
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, locale, \
                            created_at, updated_at, last_login_at";

impl User {
    /// Canonical form used for storage and lookup
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Creates a new user
    ///
    /// # Errors
    ///
    /// Fails with a database error carrying the `users_email_key` constraint if
    /// the email is taken.
    pub async fn create(
        pool: &PgPool,
        data: CreateUser,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, locale, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, User>(&query)
            .bind(Self::normalize_email(&data.email))
            .bind(data.password_hash)
            .bind(data.first_name)
            .bind(data.last_name)
            .bind(data.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()))
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Finds a user by ID
    pub async fn find_by_id(pool: &PgPool, id: UserId) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a user by (normalized) email
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");

        sqlx::query_as::<_, User>(&query)
            .bind(Self::normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    /// Stamps a successful login
    ///
    /// Returns false if the user does not exist.
    pub async fn update_last_login(
        pool: &PgPool,
        id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// First and last name joined, if any part is present
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
