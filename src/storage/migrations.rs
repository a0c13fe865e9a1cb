//! # Database Migration Management
//!
//! SQL migrations under `migrations/` are embedded into the binary and applied
//! on startup when `auto_migrate` is enabled.

use crate::errors::Result;
use crate::storage::DbPool;
use tracing::{error, info};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(available = MIGRATOR.iter().count(), "Running database migrations");
    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Database migration failed");
        e
    })?;
    info!("Database migrations completed");
    Ok(())
}
