//! Authentication service host repository

use crate::domain::AuthServiceNode;
use crate::errors::{FleetError, Result};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, FromRow)]
struct AuthServiceNodeRow {
    id: i64,
    hostname: String,
    containerized: bool,
    container_version: Option<String>,
}

impl From<AuthServiceNodeRow> for AuthServiceNode {
    fn from(row: AuthServiceNodeRow) -> Self {
        Self {
            id: row.id,
            hostname: row.hostname,
            containerized: row.containerized,
            container_version: row.container_version,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthServiceNodeRepository {
    pool: DbPool,
}

impl AuthServiceNodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self), name = "db_create_auth_service_node")]
    pub async fn create(
        &self,
        hostname: &str,
        containerized: bool,
        container_version: Option<&str>,
    ) -> Result<AuthServiceNode> {
        if hostname.is_empty() {
            return Err(FleetError::validation_field("Hostname cannot be empty", "hostname"));
        }
        let result = sqlx::query(
            "INSERT INTO auth_service_nodes (hostname, containerized, container_version) VALUES ($1, $2, $3)",
        )
        .bind(hostname)
        .bind(containerized)
        .bind(container_version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            FleetError::database(e, format!("Failed to create auth service node '{}'", hostname))
        })?;

        Ok(AuthServiceNode {
            id: result.last_insert_rowid(),
            hostname: hostname.to_string(),
            containerized,
            container_version: container_version.map(str::to_string),
        })
    }

    pub async fn list(&self) -> Result<Vec<AuthServiceNode>> {
        let rows = sqlx::query_as::<_, AuthServiceNodeRow>(
            "SELECT id, hostname, containerized, container_version FROM auth_service_nodes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, "Failed to list auth service nodes"))?;

        Ok(rows.into_iter().map(AuthServiceNode::from).collect())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM auth_service_nodes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, format!("Failed to delete auth service node {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("AuthServiceNode", id));
        }
        Ok(())
    }
}
