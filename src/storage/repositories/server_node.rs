//! Directory node repository
//!
//! CRUD over `server_nodes`, including the provider back-reference.

use crate::domain::{NewServerNode, NodeRole, Protocol, ServerNode, TlsMaterial};
use crate::errors::{FleetError, Result};
use crate::storage::DbPool;
use sqlx::FromRow;
use tracing::instrument;
use validator::Validate;

const NODE_COLUMNS: &str = "id, hostname, ip, port, protocol, role, admin_password, tls_ca_cert, \
     tls_server_cert, tls_server_key, containerized, container_version, initialized, \
     provisioned, provider_id";

#[derive(Debug, Clone, FromRow)]
struct ServerNodeRow {
    id: i64,
    hostname: String,
    ip: Option<String>,
    port: i64,
    protocol: String,
    role: String,
    admin_password: String,
    tls_ca_cert: Option<String>,
    tls_server_cert: Option<String>,
    tls_server_key: Option<String>,
    containerized: bool,
    container_version: Option<String>,
    initialized: bool,
    provisioned: bool,
    provider_id: Option<i64>,
}

impl TryFrom<ServerNodeRow> for ServerNode {
    type Error = FleetError;

    fn try_from(row: ServerNodeRow) -> Result<Self> {
        let protocol = row.protocol.parse::<Protocol>().map_err(FleetError::internal)?;
        let role = row.role.parse::<NodeRole>().map_err(FleetError::internal)?;
        let port = u16::try_from(row.port)
            .map_err(|_| FleetError::internal(format!("Stored port {} out of range", row.port)))?;

        Ok(Self {
            id: row.id,
            hostname: row.hostname,
            ip: row.ip,
            port,
            protocol,
            role,
            admin_password: row.admin_password,
            tls: TlsMaterial {
                ca_cert: row.tls_ca_cert,
                server_cert: row.tls_server_cert,
                server_key: row.tls_server_key,
            },
            containerized: row.containerized,
            container_version: row.container_version,
            initialized: row.initialized,
            provisioned: row.provisioned,
            provider_id: row.provider_id,
        })
    }
}

/// Repository for directory node persistence
#[derive(Debug, Clone)]
pub struct ServerNodeRepository {
    pool: DbPool,
}

impl ServerNodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a node. Topology rules are enforced by `FleetStore::register_node`.
    #[instrument(skip(self, request), fields(hostname = %request.hostname, role = %request.role), name = "db_create_server_node")]
    pub async fn create(&self, request: &NewServerNode) -> Result<ServerNode> {
        request.validate()?;

        let result = sqlx::query(
            "INSERT INTO server_nodes (hostname, ip, port, protocol, role, admin_password, \
             tls_ca_cert, tls_server_cert, tls_server_key, containerized, container_version, \
             provider_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&request.hostname)
        .bind(&request.ip)
        .bind(i64::from(request.port))
        .bind(request.protocol.as_str())
        .bind(request.role.as_str())
        .bind(&request.admin_password)
        .bind(&request.tls.ca_cert)
        .bind(&request.tls.server_cert)
        .bind(&request.tls.server_key)
        .bind(request.containerized)
        .bind(&request.container_version)
        .bind(request.provider_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, hostname = %request.hostname, "Failed to create server node");
            FleetError::database(e, format!("Failed to create server node '{}'", request.hostname))
        })?;

        let id = result.last_insert_rowid();
        tracing::info!(node_id = id, hostname = %request.hostname, "Registered server node");
        self.get(id).await
    }

    #[instrument(skip(self), name = "db_get_server_node")]
    pub async fn get(&self, id: i64) -> Result<ServerNode> {
        self.find(id).await?.ok_or_else(|| FleetError::not_found("ServerNode", id))
    }

    pub async fn find(&self, id: i64) -> Result<Option<ServerNode>> {
        let row = sqlx::query_as::<_, ServerNodeRow>(&format!(
            "SELECT {} FROM server_nodes WHERE id = $1",
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to get server node {}", id)))?;

        row.map(ServerNode::try_from).transpose()
    }

    #[instrument(skip(self), name = "db_list_server_nodes")]
    pub async fn list(&self) -> Result<Vec<ServerNode>> {
        let rows = sqlx::query_as::<_, ServerNodeRow>(&format!(
            "SELECT {} FROM server_nodes ORDER BY id",
            NODE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, "Failed to list server nodes"))?;

        rows.into_iter().map(ServerNode::try_from).collect()
    }

    pub async fn list_by_role(&self, role: NodeRole) -> Result<Vec<ServerNode>> {
        let rows = sqlx::query_as::<_, ServerNodeRow>(&format!(
            "SELECT {} FROM server_nodes WHERE role = $1 ORDER BY id",
            NODE_COLUMNS
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to list {} nodes", role)))?;

        rows.into_iter().map(ServerNode::try_from).collect()
    }

    /// Nodes whose `provider_id` points at `provider_id`
    pub async fn dependents_of(&self, provider_id: i64) -> Result<Vec<ServerNode>> {
        let rows = sqlx::query_as::<_, ServerNodeRow>(&format!(
            "SELECT {} FROM server_nodes WHERE provider_id = $1 ORDER BY id",
            NODE_COLUMNS
        ))
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            FleetError::database(e, format!("Failed to list dependents of node {}", provider_id))
        })?;

        rows.into_iter().map(ServerNode::try_from).collect()
    }

    #[instrument(skip(self), name = "db_set_provisioned")]
    pub async fn set_provisioned(&self, id: i64, provisioned: bool) -> Result<()> {
        self.update_flag(id, "provisioned", provisioned).await
    }

    #[instrument(skip(self), name = "db_set_initialized")]
    pub async fn set_initialized(&self, id: i64, initialized: bool) -> Result<()> {
        self.update_flag(id, "initialized", initialized).await
    }

    async fn update_flag(&self, id: i64, column: &'static str, value: bool) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE server_nodes SET {} = $1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = $2",
            column
        ))
        .bind(value)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to update {} on node {}", column, id)))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("ServerNode", id));
        }
        Ok(())
    }

    /// Re-point a node at another provider (or clear it)
    pub async fn set_provider(&self, id: i64, provider_id: Option<i64>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE server_nodes SET provider_id = $1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = $2",
        )
        .bind(provider_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to set provider of node {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("ServerNode", id));
        }
        Ok(())
    }

    /// Delete a node. Rejected while a consumer still replicates from it; a
    /// mirror peer pointing back at it is unlinked first.
    #[instrument(skip(self), name = "db_delete_server_node")]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let (consumers, peers): (Vec<ServerNode>, Vec<ServerNode>) = self
            .dependents_of(id)
            .await?
            .into_iter()
            .filter(|n| n.id != id)
            .partition(|n| n.role == NodeRole::Consumer);
        let dependents: Vec<String> = consumers.into_iter().map(|n| n.hostname).collect();
        if !dependents.is_empty() {
            return Err(FleetError::conflict(
                format!(
                    "Node {} is the provider of {}; re-point or remove them first",
                    id,
                    dependents.join(", ")
                ),
                "ServerNode",
            ));
        }

        for peer in peers {
            self.set_provider(peer.id, None).await?;
            tracing::info!(node_id = peer.id, peer_of = id, "Unlinked mirror peer");
        }

        let result = sqlx::query("DELETE FROM server_nodes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, format!("Failed to delete server node {}", id)))?;

        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("ServerNode", id));
        }
        tracing::info!(node_id = id, "Deleted server node");
        Ok(())
    }
}
