//! Key rotation policy repository

use crate::domain::{RotationBackend, RotationPolicy, SealedSecret};
use crate::errors::{FleetError, Result};
use crate::storage::DbPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;

const POLICY_COLUMNS: &str = "id, interval_days, backend, signing_service_url, token_ciphertext, \
     token_key, token_iv, rotated_at, inum_appliance";

#[derive(Debug, FromRow)]
struct RotationPolicyRow {
    id: i64,
    interval_days: i64,
    backend: String,
    signing_service_url: Option<String>,
    token_ciphertext: Option<String>,
    token_key: Option<String>,
    token_iv: Option<String>,
    rotated_at: Option<String>,
    inum_appliance: Option<String>,
}

impl TryFrom<RotationPolicyRow> for RotationPolicy {
    type Error = FleetError;

    fn try_from(row: RotationPolicyRow) -> Result<Self> {
        let token = match (row.token_ciphertext, row.token_key, row.token_iv) {
            (Some(ciphertext), Some(key), Some(iv)) => Some(SealedSecret { ciphertext, key, iv }),
            _ => None,
        };
        let rotated_at = row
            .rotated_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| FleetError::internal(format!("Invalid rotated_at timestamp: {}", e)))?;

        Ok(Self {
            id: row.id,
            interval_days: row.interval_days,
            backend: row.backend.parse::<RotationBackend>().map_err(FleetError::internal)?,
            signing_service_url: row.signing_service_url,
            token,
            rotated_at,
            inum_appliance: row.inum_appliance,
        })
    }
}

/// Editable policy fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub interval_days: i64,
    pub backend: RotationBackend,
    pub signing_service_url: Option<String>,
    pub inum_appliance: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RotationPolicyRepository {
    pool: DbPool,
}

impl RotationPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, request), name = "db_create_rotation_policy")]
    pub async fn create(&self, request: &PolicyRequest) -> Result<RotationPolicy> {
        if request.interval_days <= 0 {
            return Err(FleetError::validation_field(
                "Rotation interval must be at least one day",
                "interval_days",
            ));
        }
        let result = sqlx::query(
            "INSERT INTO rotation_policies (interval_days, backend, signing_service_url, inum_appliance) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(request.interval_days)
        .bind(request.backend.as_str())
        .bind(&request.signing_service_url)
        .bind(&request.inum_appliance)
        .execute(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, "Failed to create rotation policy"))?;

        self.get(result.last_insert_rowid()).await
    }

    #[instrument(skip(self), name = "db_get_rotation_policy")]
    pub async fn get(&self, id: i64) -> Result<RotationPolicy> {
        let row = sqlx::query_as::<_, RotationPolicyRow>(&format!(
            "SELECT {} FROM rotation_policies WHERE id = $1",
            POLICY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to get rotation policy {}", id)))?;

        row.map(RotationPolicy::try_from)
            .transpose()?
            .ok_or_else(|| FleetError::not_found("RotationPolicy", id))
    }

    /// The first configured policy, if any
    pub async fn first(&self) -> Result<Option<RotationPolicy>> {
        let row = sqlx::query_as::<_, RotationPolicyRow>(&format!(
            "SELECT {} FROM rotation_policies ORDER BY id LIMIT 1",
            POLICY_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, "Failed to load rotation policy"))?;

        row.map(RotationPolicy::try_from).transpose()
    }

    pub async fn update(&self, id: i64, request: &PolicyRequest) -> Result<RotationPolicy> {
        let result = sqlx::query(
            "UPDATE rotation_policies SET interval_days = $1, backend = $2, \
             signing_service_url = $3, inum_appliance = $4 WHERE id = $5",
        )
        .bind(request.interval_days)
        .bind(request.backend.as_str())
        .bind(&request.signing_service_url)
        .bind(&request.inum_appliance)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to update rotation policy {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("RotationPolicy", id));
        }
        self.get(id).await
    }

    /// Store a sealed signing-service token
    #[instrument(skip(self, token), name = "db_set_policy_token")]
    pub async fn set_token(&self, id: i64, token: &SealedSecret) -> Result<()> {
        let result = sqlx::query(
            "UPDATE rotation_policies SET token_ciphertext = $1, token_key = $2, token_iv = $3 WHERE id = $4",
        )
        .bind(&token.ciphertext)
        .bind(&token.key)
        .bind(&token.iv)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to store token for policy {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("RotationPolicy", id));
        }
        Ok(())
    }

    #[instrument(skip(self), name = "db_set_rotated_at")]
    pub async fn set_rotated_at(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE rotation_policies SET rotated_at = $1 WHERE id = $2")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                FleetError::database(e, format!("Failed to record rotation for policy {}", id))
            })?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("RotationPolicy", id));
        }
        Ok(())
    }
}
