//! Local keystore generation through the bundled `keygen.jar`

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::errors::{FleetError, Result};

/// Length of generated keystore passphrases
pub const PASSPHRASE_LEN: usize = 12;

/// Random alphanumeric keystore passphrase
pub fn random_passphrase() -> Zeroizing<String> {
    Zeroizing::new(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSPHRASE_LEN)
            .map(char::from)
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
struct KeygenOutput {
    keys: Vec<serde_json::Value>,
}

/// Outcome of one keygen run
#[derive(Debug)]
pub enum KeygenResult {
    /// Public keys of the new keystore
    Generated(Vec<serde_json::Value>),
    /// The tool exited non-zero
    Failed { exit_code: Option<i32>, stderr: String },
}

#[derive(Debug, Clone)]
pub struct LocalKeyGenerator {
    java_binary: String,
    javalibs_dir: PathBuf,
    keystore_path: PathBuf,
}

impl LocalKeyGenerator {
    pub fn new(javalibs_dir: impl Into<PathBuf>, keystore_path: impl Into<PathBuf>) -> Self {
        Self {
            java_binary: "java".to_string(),
            javalibs_dir: javalibs_dir.into(),
            keystore_path: keystore_path.into(),
        }
    }

    pub fn with_java_binary(mut self, java_binary: impl Into<String>) -> Self {
        self.java_binary = java_binary.into();
        self
    }

    pub fn keystore_path(&self) -> &Path {
        &self.keystore_path
    }

    fn args(&self, algorithms: &[String], validity_days: u32, passphrase: &str) -> Vec<String> {
        vec![
            "-jar".to_string(),
            self.javalibs_dir.join("keygen.jar").display().to_string(),
            "-algorithms".to_string(),
            algorithms.join(" "),
            "-dnname".to_string(),
            "CN=oxAuth CA Certificates".to_string(),
            "-expiration".to_string(),
            validity_days.to_string(),
            "-keystore".to_string(),
            self.keystore_path.display().to_string(),
            "-keypasswd".to_string(),
            passphrase.to_string(),
        ]
    }

    /// Replace the keystore with a fresh one protected by `passphrase`
    #[instrument(skip(self, passphrase), fields(keystore = %self.keystore_path.display()))]
    pub async fn generate(
        &self,
        algorithms: &[String],
        validity_days: u32,
        passphrase: &str,
    ) -> Result<KeygenResult> {
        match tokio::fs::remove_file(&self.keystore_path).await {
            Ok(()) => debug!("Removed previous keystore"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(FleetError::Io {
                    source: e,
                    context: format!(
                        "Failed to remove previous keystore {}",
                        self.keystore_path.display()
                    ),
                })
            }
        }
        if let Some(parent) = self.keystore_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| FleetError::Io {
                source: e,
                context: format!("Failed to create keystore directory {}", parent.display()),
            })?;
        }

        let output = Command::new(&self.java_binary)
            .args(self.args(algorithms, validity_days, passphrase))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FleetError::Io {
                source: e,
                context: format!("Failed to run {}", self.java_binary),
            })?;

        if !output.status.success() {
            return Ok(KeygenResult::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: KeygenOutput = serde_json::from_slice(&output.stdout)?;
        debug!(keys = parsed.keys.len(), "Keystore generated");
        Ok(KeygenResult::Generated(parsed.keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passphrase_is_alphanumeric() {
        let pass = random_passphrase();
        assert_eq!(pass.len(), PASSPHRASE_LEN);
        assert!(pass.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(*pass, *random_passphrase());
    }

    #[test]
    fn arguments_follow_keygen_cli() {
        let generator = LocalKeyGenerator::new("/srv/javalibs", "/srv/oxauth-keys.jks");
        let args = generator.args(&["RS256".to_string(), "ES512".to_string()], 365, "pw");
        assert_eq!(args[1], "/srv/javalibs/keygen.jar");
        assert_eq!(args[3], "RS256 ES512");
        assert_eq!(args[5], "CN=oxAuth CA Certificates");
        assert_eq!(args[7], "365");
        assert_eq!(args[9], "/srv/oxauth-keys.jks");
        assert_eq!(args[11], "pw");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parses_keys_and_replaces_old_keystore() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let keystore = dir.path().join("oxauth-keys.jks");
        std::fs::write(&keystore, b"old").unwrap();

        let fake_java = dir.path().join("fake-java");
        std::fs::write(&fake_java, "#!/bin/sh\necho '{\"keys\": [{\"kid\": \"k1\"}]}'\n").unwrap();
        std::fs::set_permissions(&fake_java, std::fs::Permissions::from_mode(0o755)).unwrap();

        let generator = LocalKeyGenerator::new(dir.path(), &keystore)
            .with_java_binary(fake_java.display().to_string());
        let result = generator.generate(&["RS256".to_string()], 365, "pw").await.unwrap();

        match result {
            KeygenResult::Generated(keys) => assert_eq!(keys[0]["kid"], "k1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!keystore.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake_java = dir.path().join("fake-java");
        std::fs::write(&fake_java, "#!/bin/sh\necho 'no such jar' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&fake_java, std::fs::Permissions::from_mode(0o755)).unwrap();

        let generator = LocalKeyGenerator::new(dir.path(), dir.path().join("keys.jks"))
            .with_java_binary(fake_java.display().to_string());
        match generator.generate(&["RS256".to_string()], 365, "pw").await.unwrap() {
            KeygenResult::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "no such jar");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
