//! Command output and container-aware command shaping

use super::client::RemoteSession;
use super::error::RemoteError;
use std::path::Path;

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { stdout: stdout.into(), stderr: String::new(), exit_code: Some(0) }
    }

    pub fn failed(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self { stdout: String::new(), stderr: stderr.into(), exit_code: Some(exit_code) }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, for marker scanning
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Single-quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// A remote session plus the host's container root, if any.
///
/// Commands on containerized hosts run inside the container via `chroot`;
/// file paths are prefixed with the container root.
pub struct HostShell {
    session: Box<dyn RemoteSession>,
    container_root: Option<String>,
}

impl HostShell {
    pub fn new(session: Box<dyn RemoteSession>, container_root: Option<String>) -> Self {
        Self { session, container_root }
    }

    pub fn container_root(&self) -> Option<&str> {
        self.container_root.as_deref()
    }

    /// Command as sent over the wire
    pub fn wrap(&self, command: &str) -> String {
        match &self.container_root {
            Some(root) => {
                format!("chroot {} /bin/bash -c \"{}\"", root, command.replace('"', "\\\""))
            }
            None => command.to_string(),
        }
    }

    /// Host filesystem path for a path inside the installation
    pub fn path(&self, path: &str) -> String {
        match &self.container_root {
            Some(root) => format!("{}{}", root, path),
            None => path.to_string(),
        }
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.session.run(&self.wrap(command)).await
    }

    /// Run on the host itself, bypassing the container wrapper
    pub async fn run_on_host(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.session.run(command).await
    }

    pub async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.session.upload(local, &self.path(remote)).await
    }

    pub async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.session.download(&self.path(remote), local).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        self.session.exists(&self.path(path)).await
    }

    pub async fn close(self) {
        self.session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/opt/symas/etc"), "'/opt/symas/etc'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn combined_output_keeps_order() {
        let output = CommandOutput {
            stdout: "a".into(),
            stderr: "b".into(),
            exit_code: Some(1),
        };
        assert_eq!(output.combined(), "ab");
        assert!(!output.success());
        assert!(CommandOutput::ok("x").success());
    }
}
