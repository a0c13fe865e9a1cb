//! # Storage and Persistence
//!
//! SQLite record store for fleet nodes, fleet settings, rotation policies,
//! authentication-service hosts and live signing key ids.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use crate::config::DatabaseConfig;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool};
pub use repositories::{
    ActiveKeyRepository, AuthServiceNodeRepository, FleetConfigRepository, PolicyRequest,
    RotationPolicyRepository, ServerNodeRepository,
};

use crate::domain::{NewServerNode, NodeRole, ServerNode, Topology, TopologyKind};
use crate::errors::{FleetError, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| FleetError::database(e, "Database connectivity check failed"))?;
    Ok(())
}

/// Cloneable handle to every repository
#[derive(Debug, Clone)]
pub struct FleetStore {
    pub nodes: ServerNodeRepository,
    pub fleet: FleetConfigRepository,
    pub policies: RotationPolicyRepository,
    pub auth_nodes: AuthServiceNodeRepository,
    pub active_keys: ActiveKeyRepository,
    pool: DbPool,
}

impl FleetStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            nodes: ServerNodeRepository::new(pool.clone()),
            fleet: FleetConfigRepository::new(pool.clone()),
            policies: RotationPolicyRepository::new(pool.clone()),
            auth_nodes: AuthServiceNodeRepository::new(pool.clone()),
            active_keys: ActiveKeyRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Snapshot of every directory node
    pub async fn topology(&self) -> Result<Topology> {
        Ok(Topology::new(self.nodes.list().await?))
    }

    /// Register a directory node, enforcing the configured topology.
    ///
    /// Consumers must name an existing provider. Providers are capped by the
    /// topology kind; registering the second mirror provider links the pair.
    pub async fn register_node(&self, request: &NewServerNode) -> Result<ServerNode> {
        let kind = self.fleet.get().await?.map(|c| c.topology).unwrap_or_default();
        let topology = self.topology().await?;

        match request.role {
            NodeRole::Consumer => {
                let provider_id = request.provider_id.ok_or_else(|| {
                    FleetError::validation_field("A consumer must reference a provider", "provider_id")
                })?;
                match topology.get(provider_id) {
                    Some(p) if p.is_provider() => {}
                    Some(_) => {
                        return Err(FleetError::validation_field(
                            format!("Node {} is not a provider", provider_id),
                            "provider_id",
                        ))
                    }
                    None => return Err(FleetError::not_found("ServerNode", provider_id)),
                }
                self.nodes.create(request).await
            }
            NodeRole::Provider => {
                let existing: Vec<&ServerNode> = topology.providers().collect();
                if existing.len() >= kind.max_providers() {
                    return Err(FleetError::conflict(
                        format!(
                            "{} topology allows {} provider(s)",
                            kind,
                            kind.max_providers()
                        ),
                        "ServerNode",
                    ));
                }

                let peer = match kind {
                    TopologyKind::Mirror => existing.first().map(|p| p.id),
                    TopologyKind::Single => None,
                };
                let mut request = request.clone();
                request.provider_id = peer;
                let created = self.nodes.create(&request).await?;
                if let Some(peer_id) = peer {
                    self.nodes.set_provider(peer_id, Some(created.id)).await?;
                    tracing::info!(provider = created.id, peer = peer_id, "Linked mirror providers");
                }
                Ok(created)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::memory_store;
    use super::*;
    use crate::domain::{FleetConfig, Protocol, TlsMaterial};

    fn request(hostname: &str, role: NodeRole, provider_id: Option<i64>) -> NewServerNode {
        NewServerNode {
            hostname: hostname.to_string(),
            ip: None,
            port: 1636,
            protocol: Protocol::TlsDirect,
            role,
            admin_password: "secret".into(),
            tls: TlsMaterial::default(),
            containerized: false,
            container_version: None,
            provider_id,
        }
    }

    async fn configure(store: &FleetStore, topology: TopologyKind) {
        store
            .fleet
            .save(&FleetConfig {
                replication_dn: "cn=replicator,o=gluu".into(),
                replication_password: "pw".into(),
                topology,
                cert_folder: "/etc/certs".into(),
                last_test: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consumer_requires_existing_provider() {
        let store = memory_store().await;
        let err = store.register_node(&request("c1", NodeRole::Consumer, None)).await.unwrap_err();
        assert!(matches!(err, FleetError::Validation { .. }));

        let err =
            store.register_node(&request("c1", NodeRole::Consumer, Some(42))).await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound { .. }));
    }

    #[tokio::test]
    async fn single_topology_allows_one_provider() {
        let store = memory_store().await;
        configure(&store, TopologyKind::Single).await;
        store.register_node(&request("p1", NodeRole::Provider, None)).await.unwrap();
        let err =
            store.register_node(&request("p2", NodeRole::Provider, None)).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict { .. }));
    }

    #[tokio::test]
    async fn mirror_providers_are_linked() {
        let store = memory_store().await;
        configure(&store, TopologyKind::Mirror).await;
        let p1 = store.register_node(&request("p1", NodeRole::Provider, None)).await.unwrap();
        let p2 = store.register_node(&request("p2", NodeRole::Provider, None)).await.unwrap();

        let topology = store.topology().await.unwrap();
        assert_eq!(topology.get(p1.id).unwrap().provider_id, Some(p2.id));
        assert_eq!(topology.get(p2.id).unwrap().provider_id, Some(p1.id));
        assert!(topology.violations(TopologyKind::Mirror).is_empty());

        let err = store.register_node(&request("p3", NodeRole::Provider, None)).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict { .. }));
    }

    #[tokio::test]
    async fn mirror_providers_can_be_deleted() {
        let store = memory_store().await;
        configure(&store, TopologyKind::Mirror).await;
        let p1 = store.register_node(&request("p1", NodeRole::Provider, None)).await.unwrap();
        let p2 = store.register_node(&request("p2", NodeRole::Provider, None)).await.unwrap();

        store.nodes.delete(p1.id).await.unwrap();
        assert_eq!(store.nodes.get(p2.id).await.unwrap().provider_id, None);

        store.nodes.delete(p2.id).await.unwrap();
        assert!(store.topology().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mirror_provider_with_consumer_is_still_protected() {
        let store = memory_store().await;
        configure(&store, TopologyKind::Mirror).await;
        let p1 = store.register_node(&request("p1", NodeRole::Provider, None)).await.unwrap();
        let p2 = store.register_node(&request("p2", NodeRole::Provider, None)).await.unwrap();
        store.register_node(&request("c1", NodeRole::Consumer, Some(p1.id))).await.unwrap();

        let err = store.nodes.delete(p1.id).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict { .. }));
        assert_eq!(store.nodes.get(p2.id).await.unwrap().provider_id, Some(p1.id));
    }

    #[tokio::test]
    async fn deleting_referenced_provider_is_rejected() {
        let store = memory_store().await;
        let p = store.register_node(&request("p1", NodeRole::Provider, None)).await.unwrap();
        let c = store.register_node(&request("c1", NodeRole::Consumer, Some(p.id))).await.unwrap();

        let err = store.nodes.delete(p.id).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict { .. }));

        store.nodes.delete(c.id).await.unwrap();
        store.nodes.delete(p.id).await.unwrap();
        assert!(store.topology().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_connection_succeeds() {
        let store = memory_store().await;
        check_connection(store.pool()).await.unwrap();
    }
}
