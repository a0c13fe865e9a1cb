//! Two-way replication between mirrored providers
//!
//! Each provider of the pair gets an `olcSyncrepl` directive pointing at its
//! peer and `olcMirrorMode: TRUE` on the main database entry of the online
//! configuration.

use std::sync::Arc;
use tracing::{info, instrument};

use super::provisioner::SSL_DIR;
use crate::context::FleetContext;
use crate::directory::{Credentials, Endpoint, Modification, SearchScope};
use crate::domain::{FleetConfig, Protocol, ServerNode, Topology};
use crate::errors::Result;
use crate::remote::RemoteError;
use crate::tasks::{JobContext, LogLevel, TaskLogEntry};

/// The `olcSyncrepl` value a provider uses to pull from `peer`
pub fn syncrepl_directive(peer: &ServerNode, fleet: &FleetConfig, base_dn: &str) -> String {
    let scheme = match peer.protocol {
        Protocol::TlsDirect => "ldaps",
        Protocol::Plain | Protocol::StartTls => "ldap",
    };
    let mut directive = format!(
        "rid={:03} provider={}://{}:{} bindmethod=simple binddn=\"{}\" credentials={} \
         searchbase=\"{}\" type=refreshAndPersist retry=\"60 +\" timeout=1",
        peer.id,
        scheme,
        peer.address(),
        peer.port,
        fleet.replication_dn,
        fleet.replication_password,
        base_dn,
    );
    if peer.protocol == Protocol::StartTls {
        directive.push_str(" starttls=critical");
    }
    if peer.protocol.requires_certificate() {
        directive.push_str(&format!(" tls_cacert={}/{}.crt", SSL_DIR, peer.hostname));
    }
    directive
}

pub struct MirrorLinker {
    ctx: Arc<FleetContext>,
}

impl MirrorLinker {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self { ctx }
    }

    /// Point both providers of the pair at each other. Returns whether every
    /// provider was updated.
    #[instrument(skip_all, fields(task_id = %job.task_id))]
    pub async fn link(&self, job: &JobContext, topology: &Topology) -> Result<bool> {
        let log = &job.log;
        let fleet = match self.ctx.store.fleet.get().await? {
            Some(fleet) => fleet,
            None => {
                log.error("Fleet settings are missing; cannot configure mirror replication").await;
                return Ok(false);
            }
        };

        let providers: Vec<&ServerNode> = topology.providers().collect();
        let (first, second) = match providers.as_slice() {
            [a, b] => (*a, *b),
            _ => {
                log.error(format!(
                    "Mirror replication needs exactly two providers, found {}",
                    providers.len()
                ))
                .await;
                return Ok(false);
            }
        };

        log.info(format!(
            "Configuring mirror replication between {} and {}",
            first.hostname, second.hostname
        ))
        .await;

        let mut linked = true;
        for (node, peer) in [(first, second), (second, first)] {
            job.checkpoint()?;
            if peer.protocol.requires_certificate() {
                self.copy_peer_certificate(job, node, peer).await?;
            }
            linked &= self.configure(job, node, peer, &fleet).await?;
        }
        info!(linked, "Mirror link finished");
        Ok(linked)
    }

    async fn copy_peer_certificate(
        &self,
        job: &JobContext,
        node: &ServerNode,
        peer: &ServerNode,
    ) -> Result<()> {
        let log = &job.log;
        let local = self.ctx.config.paths.cert_for(&peer.hostname);
        let remote = format!("{}/{}.crt", SSL_DIR, peer.hostname);
        let shell = match self.ctx.remote.open(&node.hostname, node.container_root()).await {
            Ok(shell) => shell,
            Err(e) => {
                log.error(format!("Cannot establish SSH connection to {}: {}", node.hostname, e))
                    .await;
                return Ok(());
            }
        };
        let copied = shell.upload(&local, &remote).await;
        shell.close().await;
        match copied {
            Ok(()) => {
                log.success(format!("Copied certificate of {} to {}", peer.hostname, node.hostname))
                    .await
            }
            Err(e @ RemoteError::CommandFailed { .. }) => {
                log.error(format!("Failed to copy certificate of {}: {}", peer.hostname, e)).await
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn configure(
        &self,
        job: &JobContext,
        node: &ServerNode,
        peer: &ServerNode,
        fleet: &FleetConfig,
    ) -> Result<bool> {
        let log = &job.log;
        let settings = &self.ctx.config.directory;
        let credentials = Credentials::new(&settings.config_admin_dn, &node.admin_password);

        let mut conn = match self.ctx.directory.connect(&Endpoint::from(node), &credentials).await {
            Ok(conn) => conn,
            Err(e) => {
                log.error(format!("Failed to connect to {}. {}", node.hostname, e)).await;
                return Ok(false);
            }
        };

        let existing = match conn
            .search(
                &settings.database_dn,
                SearchScope::Base,
                "(objectClass=*)",
                &["olcSyncrepl", "olcMirrorMode"],
            )
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                log.entry(
                    TaskLogEntry::new(
                        LogLevel::Error,
                        format!("Reading {} on {} failed: {}", settings.database_dn, node.hostname, e),
                    )
                    .with("host", &node.hostname),
                )
                .await;
                conn.release().await;
                return Err(e.into());
            }
        };
        let entry = match existing {
            Some(entry) => entry,
            None => {
                log.error(format!(
                    "Database entry {} not found on {}",
                    settings.database_dn, node.hostname
                ))
                .await;
                conn.release().await;
                return Ok(false);
            }
        };

        let directive = syncrepl_directive(peer, fleet, &settings.base_dn);
        let mods = [("olcSyncrepl", directive), ("olcMirrorMode", "TRUE".to_string())]
            .into_iter()
            .map(|(attr, value)| {
                if entry.first(attr).is_some() {
                    Modification::replace(attr, [value])
                } else {
                    Modification::add(attr, [value])
                }
            })
            .collect();

        let result = conn.modify(&settings.database_dn, mods).await;
        conn.release().await;
        match result {
            Ok(()) => {
                log.success(format!("Mirror replication enabled on {}", node.hostname)).await;
                Ok(true)
            }
            Err(e) => {
                log.error(format!("Failed to enable mirror mode on {}: {}", node.hostname, e))
                    .await;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NodeRole, TopologyKind};
    use crate::testing::TestFleet;

    fn fleet_config() -> FleetConfig {
        FleetConfig {
            replication_dn: "cn=replicator,o=gluu".into(),
            replication_password: "repl-secret".into(),
            topology: TopologyKind::Mirror,
            cert_folder: "/etc/certs".into(),
            last_test: None,
        }
    }

    #[tokio::test]
    async fn directive_for_tls_direct_peer() {
        let fleet = TestFleet::new().await;
        fleet.ctx.store.fleet.save(&fleet_config()).await.unwrap();
        let peer = fleet.add_node("ldap2.example.org", NodeRole::Provider, Protocol::TlsDirect, None).await;

        let directive = syncrepl_directive(&peer, &fleet_config(), "o=gluu");
        assert!(directive.starts_with(&format!("rid={:03} ", peer.id)));
        assert!(directive.contains("provider=ldaps://ldap2.example.org:1636"));
        assert!(directive.contains("binddn=\"cn=replicator,o=gluu\""));
        assert!(directive.contains("searchbase=\"o=gluu\""));
        assert!(directive.contains("tls_cacert=/opt/symas/ssl/ldap2.example.org.crt"));
        assert!(!directive.contains("starttls"));
    }

    #[tokio::test]
    async fn links_both_providers() {
        let fleet = TestFleet::new().await;
        fleet.ctx.store.fleet.save(&fleet_config()).await.unwrap();
        let a = fleet.add_node("ldap1.example.org", NodeRole::Provider, Protocol::StartTls, None).await;
        let b = fleet.add_provider("ldap2.example.org").await;
        let database_dn = fleet.ctx.config.directory.database_dn.clone();
        fleet.directory.put_entry("ldap1.example.org", &database_dn, &[("olcSuffix", &["o=gluu"])]);
        fleet.directory.put_entry(
            "ldap2.example.org",
            &database_dn,
            &[("olcSyncrepl", &["rid=999 stale"]), ("olcMirrorMode", &["FALSE"])],
        );

        let topology = fleet.ctx.store.topology().await.unwrap();
        let job = fleet.job("t-mirror");
        let linked = MirrorLinker::new(fleet.ctx.clone()).link(&job, &topology).await.unwrap();
        assert!(linked);

        let on_a = fleet.directory.entry("ldap1.example.org", &database_dn).unwrap();
        assert!(on_a["olcSyncrepl"][0].contains("provider=ldap://ldap2.example.org:1636"));
        assert_eq!(on_a["olcMirrorMode"], vec!["TRUE".to_string()]);

        let on_b = fleet.directory.entry("ldap2.example.org", &database_dn).unwrap();
        assert_eq!(on_b["olcSyncrepl"].len(), 1);
        assert!(on_b["olcSyncrepl"][0].contains(&format!("rid={:03}", a.id)));
        assert!(on_b["olcSyncrepl"][0].contains("starttls=critical"));

        // only b needs the certificate of its StartTLS peer
        let uploads = fleet.shell.uploads();
        assert_eq!(
            uploads,
            vec![("ldap2.example.org".to_string(), "/opt/symas/ssl/ldap1.example.org.crt".to_string())]
        );
        assert!(b.provider_id.is_some());
    }

    #[tokio::test]
    async fn missing_database_entry_is_an_error() {
        let fleet = TestFleet::new().await;
        fleet.ctx.store.fleet.save(&fleet_config()).await.unwrap();
        fleet.add_provider("ldap1.example.org").await;
        fleet.add_provider("ldap2.example.org").await;

        let topology = fleet.ctx.store.topology().await.unwrap();
        let job = fleet.job("t-missing");
        let linked = MirrorLinker::new(fleet.ctx.clone()).link(&job, &topology).await.unwrap();
        assert!(!linked);
        assert_eq!(job.log.error_count(), 2);
    }

    #[tokio::test]
    async fn refused_search_is_logged_against_the_host() {
        let fleet = TestFleet::new().await;
        fleet.ctx.store.fleet.save(&fleet_config()).await.unwrap();
        fleet.add_provider("ldap1.example.org").await;
        fleet.add_provider("ldap2.example.org").await;
        fleet.directory.reject("ldap1.example.org", "search");

        let topology = fleet.ctx.store.topology().await.unwrap();
        let job = fleet.job("t-refused");
        assert!(MirrorLinker::new(fleet.ctx.clone()).link(&job, &topology).await.is_err());

        let messages = fleet.messages("t-refused").await;
        let failure = messages
            .iter()
            .find(|m| m.level == LogLevel::Error && m.msg.starts_with("Reading "))
            .unwrap();
        assert!(failure.msg.contains("on ldap1.example.org failed"));
        assert_eq!(failure.extras.get("host").map(String::as_str), Some("ldap1.example.org"));
        assert_eq!(fleet.directory.ops_matching("unbind ldap1.example.org").len(), 1);
    }
}
