//! # Database Connection Pool Management
//!
//! Provides database connection pool creation and management utilities.

use crate::config::DatabaseConfig;
use crate::errors::{FleetError, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| FleetError::Database {
            source: e,
            context: format!("Invalid SQLite connection string: {}", config.url),
        })?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal);

    // Every connection to `:memory:` opens its own database, so the pool is
    // pinned to one long-lived connection.
    let pool_options = if config.is_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        let options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .test_before_acquire(true);
        match config.idle_timeout() {
            Some(idle_timeout) => options.idle_timeout(idle_timeout),
            None => options,
        }
    };

    let pool = pool_options
        .acquire_timeout(config.connect_timeout())
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                url = %config.url,
                busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis(),
                "Failed to create SQLite database pool"
            );
            FleetError::Database {
                source: e,
                context: format!("Failed to connect to database: {}", config.url),
            }
        })?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        in_memory = config.is_memory(),
        connect_timeout_ms = config.connect_timeout().as_millis(),
        "Database connection pool created"
    );

    if config.auto_migrate {
        tracing::info!("Auto-migration enabled, running database migrations");
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// Validate database configuration
fn validate_config(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 {
        return Err(FleetError::validation("max_connections must be greater than 0"));
    }

    if config.min_connections > config.max_connections {
        return Err(FleetError::validation(
            "min_connections cannot be greater than max_connections",
        ));
    }

    if config.url.is_empty() {
        return Err(FleetError::validation("database URL cannot be empty"));
    }

    if !config.url.starts_with("sqlite:") {
        return Err(FleetError::validation("database URL must start with 'sqlite:'"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config_invalid_min_max() {
        let config = DatabaseConfig {
            url: "sqlite://./test.db".to_string(),
            max_connections: 5,
            min_connections: 10,
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_invalid_url_scheme() {
        let config =
            DatabaseConfig { url: "mysql://localhost/test".to_string(), ..Default::default() };
        assert!(validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_create_memory_pool_runs_migrations() {
        let config = DatabaseConfig { url: "sqlite::memory:".to_string(), ..Default::default() };
        let pool = create_pool(&config).await.unwrap();

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM server_nodes").fetch_one(&pool).await.unwrap();
        assert_eq!(count.0, 0);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_create_file_pool() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("fleet.db").display());
        let config = DatabaseConfig { url, max_connections: 2, ..Default::default() };
        let pool = create_pool(&config).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
    }
}
