//! Fleet settings repository (single row, id = 1)

use crate::domain::{FleetConfig, TopologyKind};
use crate::errors::{FleetError, Result};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, FromRow)]
struct FleetConfigRow {
    replication_dn: String,
    replication_password: String,
    topology: String,
    cert_folder: String,
    last_test: Option<bool>,
}

impl TryFrom<FleetConfigRow> for FleetConfig {
    type Error = FleetError;

    fn try_from(row: FleetConfigRow) -> Result<Self> {
        Ok(Self {
            replication_dn: row.replication_dn,
            replication_password: row.replication_password,
            topology: row.topology.parse::<TopologyKind>().map_err(FleetError::internal)?,
            cert_folder: row.cert_folder,
            last_test: row.last_test,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FleetConfigRepository {
    pool: DbPool,
}

impl FleetConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The fleet settings, if they have been configured
    #[instrument(skip(self), name = "db_get_fleet_config")]
    pub async fn get(&self) -> Result<Option<FleetConfig>> {
        let row = sqlx::query_as::<_, FleetConfigRow>(
            "SELECT replication_dn, replication_password, topology, cert_folder, last_test \
             FROM fleet_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, "Failed to load fleet config"))?;

        row.map(FleetConfig::try_from).transpose()
    }

    /// Fleet settings or a `NotFound` error
    pub async fn require(&self) -> Result<FleetConfig> {
        self.get().await?.ok_or_else(|| FleetError::not_found("FleetConfig", 1))
    }

    /// Create or replace the fleet settings
    #[instrument(skip(self, config), fields(topology = %config.topology), name = "db_save_fleet_config")]
    pub async fn save(&self, config: &FleetConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO fleet_config (id, replication_dn, replication_password, topology, cert_folder, last_test) \
             VALUES (1, $1, $2, $3, $4, $5) \
             ON CONFLICT(id) DO UPDATE SET replication_dn = excluded.replication_dn, \
             replication_password = excluded.replication_password, topology = excluded.topology, \
             cert_folder = excluded.cert_folder, last_test = excluded.last_test",
        )
        .bind(&config.replication_dn)
        .bind(&config.replication_password)
        .bind(config.topology.as_str())
        .bind(&config.cert_folder)
        .bind(config.last_test)
        .execute(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, "Failed to save fleet config"))?;
        Ok(())
    }

    /// Record the outcome of the last replication test
    #[instrument(skip(self), name = "db_set_last_test")]
    pub async fn set_last_test(&self, passed: bool) -> Result<()> {
        let result = sqlx::query("UPDATE fleet_config SET last_test = $1 WHERE id = 1")
            .bind(passed)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, "Failed to record replication test result"))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("FleetConfig", 1));
        }
        Ok(())
    }
}
