//! Fleet Provisioner
//!
//! Drives one directory node from a rendered `slapd.conf` to a running
//! server over the remote shell. The steps run in order:
//!
//! ```text
//! CHECK_PREREQS -> STAGE_FILES -> PUSH_CONFIG -> RESTART_TO_VALIDATE
//!   -> CONVERT_TO_ONLINE_CONFIG -> FIX_PERMISSIONS -> START
//! ```
//!
//! Only missing server binaries or configuration abort the run early. The
//! node counts as provisioned when no `error`/`fail` entry was logged while
//! provisioning it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, Instrument};

use super::command_log::run_logged;
use super::mirror::MirrorLinker;
use crate::context::FleetContext;
use crate::domain::{NodeRole, Protocol, ServerNode, Topology, TopologyKind};
use crate::errors::{FleetError, Result};
use crate::node_span;
use crate::remote::{shell_quote, CommandOutput, HostShell, RemoteError};
use crate::tasks::{JobContext, LogLevel, TaskLogEntry, TaskLogger};

pub const SLAPTEST: &str = "/opt/symas/bin/slaptest";
pub const SLAPD_BINARY: &str = "/opt/symas/lib64/slapd";
pub const SYMAS_CONF: &str = "/opt/symas/etc/openldap/symas-openldap.conf";
pub const SLAPD_CONF: &str = "/opt/symas/etc/openldap/slapd.conf";
pub const SLAPD_D: &str = "/opt/symas/etc/openldap/slapd.d";
pub const GLUU_SCHEMA_DIR: &str = "/opt/gluu/schema/openldap";
pub const CUSTOM_SCHEMA_DIR: &str = "/opt/gluu/schema/others";
pub const SSL_DIR: &str = "/opt/symas/ssl";

/// Schema files installed by the provisioner itself
const SELF_INSTALLED_SCHEMAS: [&str; 2] =
    ["gluu/schema/openldap/gluu.schema", "gluu/schema/openldap/custom.schema"];

/// Marker printed by `service solserver start` and `slaptest` on failure
const FAILURE_MARKER: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CheckPrereqs,
    StageFiles,
    PushConfig,
    RestartToValidate,
    ConvertToOnlineConfig,
    FixPermissions,
    Start,
}

impl ProvisionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckPrereqs => "check_prereqs",
            Self::StageFiles => "stage_files",
            Self::PushConfig => "push_config",
            Self::RestartToValidate => "restart_to_validate",
            Self::ConvertToOnlineConfig => "convert_to_online_config",
            Self::FixPermissions => "fix_permissions",
            Self::Start => "start",
        }
    }
}

/// The parts of a rendered `slapd.conf` the provisioner acts on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlapdConf {
    /// `directory <path>` lines
    pub directories: Vec<String>,
    /// `include <path>` lines
    pub includes: Vec<String>,
}

impl SlapdConf {
    pub fn parse(text: &str) -> Self {
        let mut conf = Self::default();
        for line in text.lines() {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("directory"), Some(path)) if line.starts_with("directory") => {
                    conf.directories.push(path.to_string())
                }
                (Some("include"), Some(path)) if line.starts_with("include") => {
                    conf.includes.push(path.to_string())
                }
                _ => {}
            }
        }
        conf
    }

    /// Included schema files that must already be on the host
    pub fn required_schemas(&self) -> impl Iterator<Item = &str> {
        self.includes
            .iter()
            .map(String::as_str)
            .filter(|path| !SELF_INSTALLED_SCHEMAS.iter().any(|own| path.contains(own)))
    }
}

enum Flow {
    Completed,
    Aborted,
}

/// Failure as judged from command output: non-zero exit or the failure marker
fn reports_failure(output: &CommandOutput) -> bool {
    !output.success() || output.combined().to_lowercase().contains(FAILURE_MARKER)
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(FleetError::Io {
                source: e,
                context: format!("Failed to list {}", dir.display()),
            })
        }
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| FleetError::Io {
        source: e,
        context: format!("Failed to list {}", dir.display()),
    })? {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

pub struct FleetProvisioner {
    ctx: Arc<FleetContext>,
}

impl FleetProvisioner {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self { ctx }
    }

    /// Provision one node. Returns the resulting `provisioned` flag.
    #[instrument(skip(self, job), fields(task_id = %job.task_id))]
    pub async fn provision(&self, job: &JobContext, node_id: i64) -> Result<bool> {
        let topology = self.ctx.store.topology().await?;
        let node = topology
            .get(node_id)
            .cloned()
            .ok_or_else(|| FleetError::not_found("ServerNode", node_id))?;
        let log = &job.log;
        let host = node.hostname.clone();
        let errors_before = log.error_count();

        let conf_path = self.ctx.config.paths.slapd_conf_for(node.id);
        let conf = match tokio::fs::read_to_string(&conf_path).await {
            Ok(text) => SlapdConf::parse(&text),
            Err(e) => {
                log.fail(format!(
                    "Rendered configuration {} is not available: {}",
                    conf_path.display(),
                    e
                ))
                .await;
                self.ctx.store.nodes.set_provisioned(node.id, false).await?;
                return Ok(false);
            }
        };

        log.info(format!("Connecting to {}", host)).await;
        let shell = match self.ctx.remote.open(&host, node.container_root()).await {
            Ok(shell) => shell,
            Err(e) => {
                log.error(format!("Cannot establish SSH connection to {}: {}", host, e)).await;
                self.ctx.store.nodes.set_provisioned(node.id, false).await?;
                return Ok(false);
            }
        };

        let steps = self
            .run_steps(job, &shell, &node, &topology, &conf, &conf_path)
            .instrument(node_span!("provision", host));
        let outcome = steps.await;
        shell.close().await;

        match outcome {
            Ok(Flow::Completed) => {}
            Ok(Flow::Aborted) => {
                self.ctx.store.nodes.set_provisioned(node.id, false).await?;
                return Ok(false);
            }
            Err(FleetError::Remote(e)) => {
                log.error(format!("Lost connection to {}: {}", host, e)).await;
            }
            Err(e) => return Err(e),
        }

        let provisioned = log.error_count() == errors_before;
        self.ctx.store.nodes.set_provisioned(node.id, provisioned).await?;
        info!(node_id = node.id, provisioned, "Provisioning finished");

        if provisioned {
            log.success(format!("Provisioning of {} completed", host)).await;
            self.link_mirror_if_ready(job, &node).await?;
        } else {
            log.info(format!("Provisioning of {} finished with errors", host)).await;
        }
        Ok(provisioned)
    }

    async fn link_mirror_if_ready(&self, job: &JobContext, node: &ServerNode) -> Result<()> {
        if !node.is_provider() {
            return Ok(());
        }
        let kind = self.ctx.store.fleet.get().await?.map(|c| c.topology).unwrap_or_default();
        if kind != TopologyKind::Mirror {
            return Ok(());
        }
        let topology = self.ctx.store.topology().await?;
        let providers: Vec<&ServerNode> = topology.providers().collect();
        if providers.len() != 2 {
            return Ok(());
        }
        match topology.mirror_peer(node) {
            Some(peer) if peer.provisioned => {
                MirrorLinker::new(Arc::clone(&self.ctx)).link(job, &topology).await?;
            }
            Some(peer) => {
                job.log
                    .info(format!(
                        "Mirror replication will be configured once {} is provisioned",
                        peer.hostname
                    ))
                    .await;
            }
            None => {}
        }
        Ok(())
    }

    async fn announce(&self, log: &TaskLogger, host: &str, step: ProvisionStep, msg: &str) {
        log.entry(
            TaskLogEntry::new(LogLevel::Info, msg).with("host", host).with("step", step.as_str()),
        )
        .await;
    }

    async fn run_steps(
        &self,
        job: &JobContext,
        shell: &HostShell,
        node: &ServerNode,
        topology: &Topology,
        conf: &SlapdConf,
        conf_path: &Path,
    ) -> Result<Flow> {
        let log = &job.log;
        let host = node.hostname.as_str();

        self.announce(log, host, ProvisionStep::CheckPrereqs, "Checking prerequisites").await;
        if !self.check_prerequisites(log, shell, node, conf).await? {
            log.info("Install the directory server on the host and run provisioning again").await;
            return Ok(Flow::Aborted);
        }
        job.checkpoint()?;

        self.announce(log, host, ProvisionStep::StageFiles, "Creating data and schema directories")
            .await;
        self.stage_files(log, shell, node, topology, conf).await?;
        job.checkpoint()?;

        self.announce(log, host, ProvisionStep::PushConfig, "Copying slapd.conf to the server").await;
        self.upload_logged(log, shell, host, conf_path, SLAPD_CONF, "Failed to copy the slapd.conf file")
            .await?;
        job.checkpoint()?;

        self.announce(log, host, ProvisionStep::RestartToValidate, "Restarting the directory server")
            .await;
        run_logged(shell, log, host, "service solserver restart").await?;
        job.checkpoint()?;

        self.announce(
            log,
            host,
            ProvisionStep::ConvertToOnlineConfig,
            "Generating slapd.d online configuration",
        )
        .await;
        run_logged(shell, log, host, &format!("rm -rf {}", SLAPD_D)).await?;
        run_logged(shell, log, host, &format!("mkdir -p {}", SLAPD_D)).await?;
        let converted =
            run_logged(shell, log, host, &format!("{} -f {} -F {}", SLAPTEST, SLAPD_CONF, SLAPD_D))
                .await?;
        if reports_failure(&converted) {
            log.error("Online configuration conversion failed").await;
        } else {
            log.success("Online configuration generated").await;
        }
        job.checkpoint()?;

        if node.containerized {
            self.announce(log, host, ProvisionStep::FixPermissions, "Resetting ownership to ldap")
                .await;
            let mut dirs: Vec<String> = conf.directories.iter().map(|d| shell_quote(d)).collect();
            dirs.push("/opt/gluu/schema".to_string());
            dirs.push(SLAPD_D.to_string());
            run_logged(shell, log, host, &format!("chown -R ldap:ldap {}", dirs.join(" "))).await?;
            job.checkpoint()?;
        }

        self.announce(log, host, ProvisionStep::Start, "Starting the directory server").await;
        let started = run_logged(shell, log, host, "service solserver start").await?;
        if started.combined().to_lowercase().contains(FAILURE_MARKER) {
            log.fail("The directory server failed to start").await;
            log.info("Debugging slapd...").await;
            run_logged(
                shell,
                log,
                host,
                &format!("timeout 10 {} -d 1 -f {}", SLAPD_BINARY, SLAPD_CONF),
            )
            .await?;
        } else {
            log.success("Directory server started").await;
        }

        Ok(Flow::Completed)
    }

    async fn check_exists(
        &self,
        log: &TaskLogger,
        shell: &HostShell,
        path: &str,
        label: &str,
    ) -> std::result::Result<bool, RemoteError> {
        let found = shell.exists(path).await?;
        let level = if found { LogLevel::Success } else { LogLevel::Fail };
        log.entry(TaskLogEntry::new(level, label).with("path", path)).await;
        Ok(found)
    }

    /// `false` when the host lacks the server binaries or configuration
    async fn check_prerequisites(
        &self,
        log: &TaskLogger,
        shell: &HostShell,
        node: &ServerNode,
        conf: &SlapdConf,
    ) -> Result<bool> {
        if !self.check_exists(log, shell, SLAPTEST, "Checking if OpenLDAP is installed").await? {
            return Ok(false);
        }
        if !self.check_exists(log, shell, SYMAS_CONF, "Checking if symas-openldap.conf exists").await? {
            return Ok(false);
        }

        if !node.containerized {
            let material = [
                ("Checking TLS CA Certificate", &node.tls.ca_cert),
                ("Checking TLS Server Certificate", &node.tls.server_cert),
                ("Checking TLS Server Key", &node.tls.server_key),
            ];
            for (label, path) in material {
                if let Some(path) = path.as_deref().filter(|p| !p.is_empty()) {
                    self.check_exists(log, shell, path, label).await?;
                }
            }
        }

        if node.role == NodeRole::Provider {
            log.info("Checking for schema files included in slapd.conf").await;
            for schema in conf.required_schemas() {
                self.check_exists(log, shell, schema, &format!("==> {}", schema)).await?;
            }
        }
        Ok(true)
    }

    async fn stage_files(
        &self,
        log: &TaskLogger,
        shell: &HostShell,
        node: &ServerNode,
        topology: &Topology,
        conf: &SlapdConf,
    ) -> Result<()> {
        let host = node.hostname.as_str();
        let paths = &self.ctx.config.paths;

        for dir in &conf.directories {
            run_logged(shell, log, host, &format!("mkdir -p {}", shell_quote(dir))).await?;
        }
        run_logged(shell, log, host, &format!("mkdir -p {} {}", GLUU_SCHEMA_DIR, CUSTOM_SCHEMA_DIR))
            .await?;

        log.info("Copying schema files to the server").await;
        let builtin = list_files(&paths.builtin_schema_dir).await?;
        if builtin.is_empty() {
            log.warning(format!(
                "No built-in schema files found in {}",
                paths.builtin_schema_dir.display()
            ))
            .await;
        }
        for file in builtin {
            let remote = format!("{}/{}", GLUU_SCHEMA_DIR, file_name(&file));
            self.upload_logged(log, shell, host, &file, &remote, "Failed to copy schema file").await?;
        }
        for file in list_files(&paths.schema_dir).await? {
            let remote = format!("{}/{}", CUSTOM_SCHEMA_DIR, file_name(&file));
            self.upload_logged(log, shell, host, &file, &remote, "Failed to copy schema file").await?;
        }

        if node.role == NodeRole::Consumer {
            if let Some(provider) = topology.provider_of(node) {
                if provider.protocol != Protocol::Plain {
                    log.info(format!("Copying the certificate of provider {}", provider.hostname))
                        .await;
                    let local = paths.cert_for(&provider.hostname);
                    let remote = format!("{}/{}.crt", SSL_DIR, provider.hostname);
                    self.upload_logged(
                        log,
                        shell,
                        host,
                        &local,
                        &remote,
                        "Failed to copy the provider certificate",
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Upload a file, logging a failed transfer as an error. Transport
    /// failures propagate.
    async fn upload_logged(
        &self,
        log: &TaskLogger,
        shell: &HostShell,
        host: &str,
        local: &Path,
        remote: &str,
        failure: &str,
    ) -> Result<()> {
        match shell.upload(local, remote).await {
            Ok(()) => {
                log.entry(
                    TaskLogEntry::new(LogLevel::Debug, format!("Uploaded {}", shell.path(remote)))
                        .with("host", host),
                )
                .await;
                Ok(())
            }
            Err(e @ RemoteError::CommandFailed { .. }) => {
                log.entry(
                    TaskLogEntry::new(LogLevel::Error, format!("{}: {}", failure, e))
                        .with("host", host),
                )
                .await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
