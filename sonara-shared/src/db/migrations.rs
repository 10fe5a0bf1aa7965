//! Embedded database migrations
//!
//! The SQL files under `sonara-shared/migrations/` are compiled into the binary
//! and applied at startup.

use sqlx::postgres::PgPool;
use tracing::{info, warn};

/// Applies every migration not yet recorded in `_sqlx_migrations`
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Starting database migrations");

    match sqlx::migrate!("./migrations").run(pool).await {
        Ok(()) => {
            info!("All database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            warn!("Migration failed: {}", e);
            Err(e)
        }
    }
}
