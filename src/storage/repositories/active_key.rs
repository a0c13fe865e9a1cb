//! Live signing-service key ids

use crate::domain::ActiveKey;
use crate::errors::{FleetError, Result};
use crate::storage::DbPool;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct ActiveKeyRow {
    id: i64,
    kid: String,
}

#[derive(Debug, Clone)]
pub struct ActiveKeyRepository {
    pool: DbPool,
}

impl ActiveKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<ActiveKey>> {
        let rows = sqlx::query_as::<_, ActiveKeyRow>("SELECT id, kid FROM active_keys ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, "Failed to list active keys"))?;

        Ok(rows.into_iter().map(|r| ActiveKey { id: r.id, kid: r.kid }).collect())
    }

    /// Track a newly minted key id; re-adding a known kid is a no-op
    pub async fn add(&self, kid: &str) -> Result<()> {
        sqlx::query("INSERT INTO active_keys (kid) VALUES ($1) ON CONFLICT(kid) DO NOTHING")
            .bind(kid)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, format!("Failed to store active key '{}'", kid)))?;
        Ok(())
    }

    /// Forget a revoked key id
    pub async fn remove(&self, kid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM active_keys WHERE kid = $1")
            .bind(kid)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, format!("Failed to remove active key '{}'", kid)))?;
        Ok(result.rows_affected() > 0)
    }
}
