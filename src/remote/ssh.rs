//! Remote sessions over the system OpenSSH client
//!
//! Each session starts a multiplexing master (`ControlMaster`) so that every
//! later `ssh`/`scp` invocation reuses one authenticated connection. Unknown
//! host keys are accepted on first contact and appended to the known-hosts
//! file (`StrictHostKeyChecking=accept-new`); changed keys are still refused.

use super::client::{RemoteConnector, RemoteSession};
use super::command::{shell_quote, CommandOutput};
use super::error::RemoteError;
use crate::config::RemoteConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    config: RemoteConfig,
}

impl OpenSshConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

fn common_options(config: &RemoteConfig, control_path: &Path) -> Vec<String> {
    let mut options = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", config.connect_timeout_seconds),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
    ];
    if let Some(known_hosts) = &config.known_hosts_file {
        options.push("-o".to_string());
        options.push(format!("UserKnownHostsFile={}", known_hosts.display()));
    }
    options
}

async fn output_of(mut command: Command, host: &str) -> Result<CommandOutput, RemoteError> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let output = command
        .output()
        .await
        .map_err(|e| RemoteError::io(format!("failed to spawn ssh client for {}", host), e))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

#[async_trait]
impl RemoteConnector for OpenSshConnector {
    #[instrument(skip(self), fields(host = %host))]
    async fn connect(&self, host: &str, user: &str) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        let control_path = std::env::temp_dir().join(format!("dirfleet-{}.sock", &short_id[..12]));
        let target = format!("{}@{}", user, host);

        let mut command = Command::new(&self.config.ssh_binary);
        command
            .args(common_options(&self.config, &control_path))
            .args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes", "-f", "-N"])
            .arg(&target);

        let output = output_of(command, host).await?;
        if !output.success() {
            return Err(RemoteError::not_ready(host, output.stderr.trim()));
        }

        debug!(control_path = %control_path.display(), "SSH master connection established");
        Ok(Box::new(OpenSshSession {
            host: host.to_string(),
            target,
            control_path,
            config: self.config.clone(),
        }))
    }
}

/// ssh exits 255 when the connection itself failed
const SSH_TRANSPORT_FAILURE: i32 = 255;

pub struct OpenSshSession {
    host: String,
    target: String,
    control_path: PathBuf,
    config: RemoteConfig,
}

impl OpenSshSession {
    fn ssh(&self) -> Command {
        let mut command = Command::new(&self.config.ssh_binary);
        command.args(common_options(&self.config, &self.control_path));
        command
    }

    async fn scp(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut command = Command::new(&self.config.scp_binary);
        command.args(common_options(&self.config, &self.control_path)).arg("-q").arg(from).arg(to);
        let output = output_of(command, &self.host).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RemoteError::CommandFailed {
                command: format!("scp {} {}", from, to),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut ssh = self.ssh();
        ssh.arg(&self.target).arg("--").arg(command);
        let output = output_of(ssh, &self.host).await?;
        if output.exit_code == Some(SSH_TRANSPORT_FAILURE) && output.stdout.is_empty() {
            return Err(RemoteError::transport(&self.host, output.stderr.trim()));
        }
        Ok(output)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.scp(&local.display().to_string(), &format!("{}:{}", self.target, remote)).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.scp(&format!("{}:{}", self.target, remote), &local.display().to_string()).await
    }

    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        let output = self.run(&format!("stat {}", shell_quote(path))).await?;
        Ok(output.success())
    }

    async fn close(&self) {
        let mut ssh = self.ssh();
        ssh.args(["-O", "exit"]).arg(&self.target);
        match output_of(ssh, &self.host).await {
            Ok(output) if output.success() => debug!(host = %self.host, "SSH master closed"),
            Ok(output) => warn!(host = %self.host, stderr = %output.stderr.trim(), "SSH master exit failed"),
            Err(e) => warn!(host = %self.host, error = %e, "SSH master exit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_include_control_path_and_host_key_policy() {
        let config = RemoteConfig {
            known_hosts_file: Some(PathBuf::from("/var/lib/dirfleet/known_hosts")),
            ..Default::default()
        };
        let options = common_options(&config, Path::new("/tmp/dirfleet-abc.sock"));
        assert!(options.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(options.contains(&"ControlPath=/tmp/dirfleet-abc.sock".to_string()));
        assert!(options.contains(&"UserKnownHostsFile=/var/lib/dirfleet/known_hosts".to_string()));
        assert!(options.contains(&"ConnectTimeout=10".to_string()));
    }

    #[tokio::test]
    async fn missing_ssh_binary_is_io_error() {
        let config = RemoteConfig {
            ssh_binary: "/nonexistent/dirfleet-ssh".to_string(),
            ..Default::default()
        };
        let connector = OpenSshConnector::new(config);
        let err = connector.connect("ldap1.example.org", "root").await.err().unwrap();
        assert!(matches!(err, RemoteError::Io { .. }));
    }
}
