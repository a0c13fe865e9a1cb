//! Provider initialization
//!
//! Optionally loads an initial LDIF export into a provider, then creates the
//! replication manager entry and proves it can bind.

use std::sync::Arc;
use tracing::instrument;

use super::command_log::run_logged;
use crate::context::FleetContext;
use crate::directory::{Attributes, Credentials, DirectoryError, Endpoint};
use crate::domain::{FleetConfig, ServerNode};
use crate::errors::{FleetError, Result};
use crate::tasks::JobContext;

const SLAPADD: &str = "/opt/symas/bin/slapadd";
const STAGED_LDIF: &str = "/tmp/init.ldif";

fn replication_user(fleet: &FleetConfig) -> Attributes {
    vec![
        ("objectclass".to_string(), vec!["top".to_string(), "person".to_string()]),
        ("cn".to_string(), vec![fleet.replication_cn().to_string()]),
        ("sn".to_string(), vec!["gluu".to_string()]),
        ("userPassword".to_string(), vec![fleet.replication_password.clone()]),
    ]
}

pub struct ProviderInitializer {
    ctx: Arc<FleetContext>,
}

impl ProviderInitializer {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self { ctx }
    }

    /// Initialize a provider. Returns the resulting `initialized` flag.
    #[instrument(skip(self, job), fields(task_id = %job.task_id))]
    pub async fn initialize(&self, job: &JobContext, node_id: i64, use_ldif: bool) -> Result<bool> {
        let log = &job.log;
        let node = self.ctx.store.nodes.get(node_id).await?;
        if !node.is_provider() {
            log.warning(format!("{} is not a provider; nothing to initialize", node.hostname))
                .await;
            return Ok(false);
        }
        let fleet = match self.ctx.store.fleet.get().await? {
            Some(fleet) => fleet,
            None => {
                log.error("Fleet settings are missing; configure the replication DN first").await;
                return Ok(false);
            }
        };

        if use_ldif {
            job.checkpoint()?;
            if !self.import_ldif(job, &node).await? {
                return Ok(false);
            }
        }

        job.checkpoint()?;
        if !self.add_replication_user(job, &node, &fleet).await? {
            return Ok(false);
        }

        job.checkpoint()?;
        let credentials = Credentials::new(&fleet.replication_dn, &fleet.replication_password);
        match self.ctx.directory.connect(&Endpoint::from(&node), &credentials).await {
            Ok(conn) => {
                conn.release().await;
                log.success("Authenticating as the Replication DN.").await;
                self.ctx.store.nodes.set_initialized(node.id, true).await?;
                log.success(format!("Provider {} initialized", node.hostname)).await;
                Ok(true)
            }
            Err(e) => {
                log.error(format!("Authentication as the Replication DN failed: {}", e)).await;
                Ok(false)
            }
        }
    }

    /// Stop the server, load the stored LDIF with `slapadd` and start again
    async fn import_ldif(&self, job: &JobContext, node: &ServerNode) -> Result<bool> {
        let log = &job.log;
        let host = node.hostname.as_str();
        let ldif = self.ctx.config.paths.init_ldif_for(node.id);
        if !tokio::fs::try_exists(&ldif).await.unwrap_or(false) {
            log.error(format!("Initial LDIF {} is not available", ldif.display())).await;
            return Ok(false);
        }

        let shell = match self.ctx.remote.open(host, node.container_root()).await {
            Ok(shell) => shell,
            Err(e) => {
                log.error(format!("Cannot establish SSH connection to {}: {}", host, e)).await;
                return Ok(false);
            }
        };

        let imported = async {
            log.info(format!("Copying {} to {}", ldif.display(), host)).await;
            shell.upload(&ldif, STAGED_LDIF).await?;
            run_logged(&shell, log, host, "service solserver stop").await?;
            let slapadd = run_logged(
                &shell,
                log,
                host,
                &format!("{} -b {} -l {}", SLAPADD, self.ctx.config.directory.base_dn, STAGED_LDIF),
            )
            .await?;
            run_logged(&shell, log, host, "service solserver start").await?;
            run_logged(&shell, log, host, &format!("rm {}", STAGED_LDIF)).await?;
            Ok::<bool, crate::remote::RemoteError>(slapadd.success())
        }
        .await;
        shell.close().await;

        match imported {
            Ok(true) => {
                log.success("Initial data imported").await;
                Ok(true)
            }
            Ok(false) => {
                log.fail("slapadd failed to import the initial data").await;
                Ok(false)
            }
            Err(e) => {
                log.error(format!("Initial data import on {} failed: {}", host, e)).await;
                Ok(false)
            }
        }
    }

    async fn add_replication_user(
        &self,
        job: &JobContext,
        node: &ServerNode,
        fleet: &FleetConfig,
    ) -> Result<bool> {
        let log = &job.log;
        let credentials = self.ctx.root_credentials(&node.admin_password);
        let mut conn = match self.ctx.directory.connect(&Endpoint::from(node), &credentials).await {
            Ok(conn) => conn,
            Err(e) => {
                log.error(format!("Failed to connect to {}. {}", node.hostname, e)).await;
                return Ok(false);
            }
        };

        let dn = fleet.replication_dn.as_str();
        let mut added = conn.add(dn, replication_user(fleet)).await;
        if matches!(added, Err(DirectoryError::AlreadyExists { .. })) {
            log.debug(format!("{} exists; replacing it", dn)).await;
            added = match conn.delete(dn).await {
                Ok(()) => conn.add(dn, replication_user(fleet)).await,
                Err(e) => Err(e),
            };
        }
        conn.release().await;

        match added {
            Ok(()) => {
                log.success("Replication user added.").await;
                Ok(true)
            }
            Err(e @ DirectoryError::Unreachable { .. }) => Err(FleetError::from(e)),
            Err(e) => {
                log.fail(format!("Failed to add Replication user: {}", e)).await;
                Ok(false)
            }
        }
    }
}
