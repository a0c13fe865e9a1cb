//! Key Rotation Engine
//!
//! Replaces the authentication service's signing keys when the policy is due.
//! New keys come from the remote signing service or from a local keystore
//! generator; the public keys are published by rewriting the service's
//! configuration entry on the first provider.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use super::keygen::{random_passphrase, KeygenResult, LocalKeyGenerator};
use super::signing_service::{endpoint, SigningError, SigningServiceClient};
use crate::context::FleetContext;
use crate::directory::{Endpoint, Modification, SearchScope};
use crate::domain::{AuthServiceNode, RotationBackend, RotationPolicy, ServerNode};
use crate::errors::{FleetError, Result};
use crate::observability::metrics;
use crate::tasks::{JobContext, LogLevel, TaskLogEntry, TaskLogger};

/// Signing-service operations advertised to the authentication service
const ADVERTISED_OPERATIONS: [(&str, &str); 5] = [
    ("oxElevenGenerateKeyEndpoint", "generateKey"),
    ("oxElevenSignEndpoint", "sign"),
    ("oxElevenVerifySignatureEndpoint", "verifySignature"),
    ("oxElevenDeleteKeyEndpoint", "deleteKey"),
    ("oxElevenJwksEndpoint", "jwks"),
];

const DEFAULT_SIGNATURE_ALGORITHM: &str = "RS512";

/// DN of the authentication service's configuration entry
pub fn auth_config_dn(inum_appliance: &str, base_dn: &str) -> String {
    format!("ou=oxauth,ou=configuration,inum={},ou=appliances,{}", inum_appliance, base_dn)
}

/// How a rotation run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    Rotated,
    NotDue,
    /// Another rotation of the same policy holds the guard
    AlreadyRunning,
    /// Neither backend produced keys; nothing was published
    NoKeys,
    /// Keys were obtained but could not be published
    Failed,
}

impl RotationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotated => "rotated",
            Self::NotDue => "not_due",
            Self::AlreadyRunning => "already_running",
            Self::NoKeys => "no_keys",
            Self::Failed => "failed",
        }
    }

    /// Whether the run left the fleet in the intended state
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Rotated | Self::NotDue | Self::AlreadyRunning)
    }
}

/// Keys obtained from a backend plus what the directory update advertises
struct NewKeys {
    keys: Vec<Value>,
    keystore_secret: Option<Zeroizing<String>>,
    signing_token: Option<Zeroizing<String>>,
}

impl NewKeys {
    fn empty() -> Self {
        Self { keys: Vec::new(), keystore_secret: None, signing_token: None }
    }
}

/// Seal a signing-service token with a fresh key and IV and store it on the policy
pub async fn set_policy_token(ctx: &FleetContext, policy_id: i64, token: &str) -> Result<()> {
    let sealed = ctx.cipher.seal(token.as_bytes())?;
    ctx.store.policies.set_token(policy_id, &sealed).await
}

pub struct KeyRotator {
    ctx: Arc<FleetContext>,
    java_binary: Option<String>,
}

impl KeyRotator {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self { ctx, java_binary: None }
    }

    /// Run the local generator with another `java` executable
    pub fn with_java_binary(mut self, java_binary: impl Into<String>) -> Self {
        self.java_binary = Some(java_binary.into());
        self
    }

    /// Rotate the policy's keys. Without `force` the policy's due time is
    /// honoured.
    #[instrument(skip(self, job), fields(task_id = %job.task_id))]
    pub async fn rotate(&self, job: &JobContext, policy_id: i64, force: bool) -> Result<RotationOutcome> {
        let log = &job.log;
        let guard = self.ctx.rotation_lock(policy_id);
        let _held = match guard.try_lock() {
            Ok(held) => held,
            Err(_) => {
                log.info(format!("Key rotation for policy {} is already running", policy_id)).await;
                return Ok(RotationOutcome::AlreadyRunning);
            }
        };

        let policy = self.ctx.store.policies.get(policy_id).await?;
        if !force && !policy.should_rotate() {
            let due = policy
                .next_rotation_at()
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "now".to_string());
            log.debug(format!("Key rotation is not due; next rotation at {}", due)).await;
            return Ok(RotationOutcome::NotDue);
        }

        log.info(format!("Rotating keys using the {} backend", policy.backend)).await;
        let new_keys = match policy.backend {
            RotationBackend::RemoteSigningService => self.remote_keys(job, &policy).await?,
            RotationBackend::LocalKeystore => self.local_keys(log).await?,
        };
        job.checkpoint()?;

        if new_keys.keys.is_empty() {
            log.error("No keys were generated; the directory configuration is unchanged").await;
            metrics::record_key_rotation(RotationOutcome::NoKeys.as_str());
            return Ok(RotationOutcome::NoKeys);
        }

        if !self.publish(log, &policy, &new_keys).await? {
            metrics::record_key_rotation(RotationOutcome::Failed.as_str());
            return Ok(RotationOutcome::Failed);
        }

        self.ctx.store.policies.set_rotated_at(policy.id, Utc::now()).await?;
        log.success(format!("Published {} new keys", new_keys.keys.len())).await;

        if policy.backend == RotationBackend::LocalKeystore {
            job.checkpoint()?;
            self.distribute_keystore(log).await?;
        }

        metrics::record_key_rotation(RotationOutcome::Rotated.as_str());
        info!(policy_id = policy.id, "Key rotation finished");
        Ok(RotationOutcome::Rotated)
    }

    /// Revoke tracked keys, then mint one key per configured algorithm
    async fn remote_keys(&self, job: &JobContext, policy: &RotationPolicy) -> Result<NewKeys> {
        let log = &job.log;
        let (url, sealed) = match (&policy.signing_service_url, &policy.token) {
            (Some(url), Some(sealed)) if !url.is_empty() => (url, sealed),
            _ => {
                log.error("The signing service URL or access token is not configured").await;
                return Ok(NewKeys::empty());
            }
        };
        let token = self.ctx.cipher.open(sealed)?;
        let client = SigningServiceClient::new(
            url.clone(),
            token.clone(),
            self.ctx.config.rotation.request_timeout(),
        )?;

        for key in self.ctx.store.active_keys.list().await? {
            match client.delete_key(&key.kid).await {
                Ok(true) => {
                    self.ctx.store.active_keys.remove(&key.kid).await?;
                    log.debug(format!("Deleted key {}", key.kid)).await;
                }
                Ok(false) => log.warning(format!("The signing service kept key {}", key.kid)).await,
                Err(SigningError::Unauthorized) => {
                    log.warning(format!("Deleting key {}: insufficient access", key.kid)).await
                }
                Err(e) if e.is_connection() => {
                    log.error(e.to_string()).await;
                    return Ok(NewKeys::empty());
                }
                Err(e) => log.error(format!("Deleting key {} failed: {}", key.kid, e)).await,
            }
        }
        job.checkpoint()?;

        let settings = &self.ctx.config.rotation;
        let mut keys = Vec::new();
        for algorithm in &settings.algorithms {
            match client.generate_key(algorithm, settings.key_validity_days).await {
                Ok(generated) => {
                    self.ctx.store.active_keys.add(&generated.kid).await?;
                    keys.push(generated.jwk);
                }
                Err(SigningError::Unauthorized) => {
                    log.warning(format!("Generating a {} key: insufficient access", algorithm)).await
                }
                Err(SigningError::Status { status, body }) => {
                    log.error(format!(
                        "Generating a {} key failed with status {}: {}",
                        algorithm, status, body
                    ))
                    .await
                }
                Err(e) if e.is_connection() => {
                    log.error(e.to_string()).await;
                    break;
                }
                Err(e) => log.error(format!("Generating a {} key failed: {}", algorithm, e)).await,
            }
        }

        Ok(NewKeys { keys, keystore_secret: None, signing_token: Some(token) })
    }

    async fn local_keys(&self, log: &TaskLogger) -> Result<NewKeys> {
        let paths = &self.ctx.config.paths;
        let settings = &self.ctx.config.rotation;
        let mut generator = LocalKeyGenerator::new(&paths.javalibs_dir, &paths.keystore_path);
        if let Some(java) = &self.java_binary {
            generator = generator.with_java_binary(java.clone());
        }

        let passphrase = random_passphrase();
        match generator
            .generate(&settings.algorithms, settings.key_validity_days, &passphrase)
            .await?
        {
            KeygenResult::Generated(keys) => {
                log.debug(format!("Generated keystore {}", generator.keystore_path().display()))
                    .await;
                Ok(NewKeys { keys, keystore_secret: Some(passphrase), signing_token: None })
            }
            KeygenResult::Failed { exit_code, stderr } => {
                log.error(format!(
                    "Key generation exited with {}: {}",
                    exit_code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()),
                    stderr
                ))
                .await;
                Ok(NewKeys::empty())
            }
        }
    }

    /// Rewrite the authentication service's configuration entry in one modify
    async fn publish(&self, log: &TaskLogger, policy: &RotationPolicy, new_keys: &NewKeys) -> Result<bool> {
        let settings = &self.ctx.config.directory;
        let inum = match policy.inum_appliance.as_deref().filter(|i| !i.is_empty()) {
            Some(inum) => inum,
            None => {
                log.error("The appliance identifier of the rotation policy is not set").await;
                return Ok(false);
            }
        };
        let topology = self.ctx.store.topology().await?;
        let provider: &ServerNode = match topology.providers().next() {
            Some(provider) => provider,
            None => {
                log.error("No provider is registered to publish the keys to").await;
                return Ok(false);
            }
        };

        let credentials = self.ctx.root_credentials(&provider.admin_password);
        let mut conn = match self.ctx.directory.connect(&Endpoint::from(provider), &credentials).await {
            Ok(conn) => conn,
            Err(e) => {
                log.error(format!("Failed to connect to {}. {}", provider.hostname, e)).await;
                return Ok(false);
            }
        };

        let dn = auth_config_dn(inum, &settings.base_dn);
        let entry = match conn
            .search(&dn, SearchScope::Base, "(objectClass=*)", &["oxRevision", "oxAuthConfWebKeys", "oxAuthConfDynamic"])
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                log.entry(
                    TaskLogEntry::new(
                        LogLevel::Error,
                        format!("Reading {} on {} failed: {}", dn, provider.hostname, e),
                    )
                    .with("host", &provider.hostname),
                )
                .await;
                conn.release().await;
                return Err(e.into());
            }
        };
        let entry = match entry {
            Some(entry) => entry,
            None => {
                conn.release().await;
                log.error(format!("Configuration entry {} not found on {}", dn, provider.hostname))
                    .await;
                return Ok(false);
            }
        };

        let revision = entry.first("oxRevision").and_then(|r| r.trim().parse::<i64>().ok()).unwrap_or(0);
        let mut dynamic: Value = entry
            .first("oxAuthConfDynamic")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}));
        self.update_dynamic(&mut dynamic, policy, new_keys)?;
        let web_keys = json!({ "keys": new_keys.keys });

        let mods = vec![
            Modification::replace("oxRevision", [(revision + 1).to_string()]),
            Modification::replace("oxAuthConfWebKeys", [web_keys.to_string()]),
            Modification::replace("oxAuthConfDynamic", [dynamic.to_string()]),
        ];
        let modified = conn.modify(&dn, mods).await;
        conn.release().await;
        match modified {
            Ok(()) => {
                log.success(format!("Updated the configuration entry on {}", provider.hostname)).await;
                Ok(true)
            }
            Err(e) => {
                log.error(format!("Updating {} failed: {}", dn, e)).await;
                Ok(false)
            }
        }
    }

    fn update_dynamic(&self, dynamic: &mut Value, policy: &RotationPolicy, new_keys: &NewKeys) -> Result<()> {
        let map = dynamic
            .as_object_mut()
            .ok_or_else(|| FleetError::validation("oxAuthConfDynamic is not a JSON object"))?;
        map.insert("keyRegenerationEnabled".into(), json!(false));
        map.insert("keyRegenerationInterval".into(), json!(policy.interval_days * 24));
        map.insert("defaultSignatureAlgorithm".into(), json!(DEFAULT_SIGNATURE_ALGORITHM));

        match policy.backend {
            RotationBackend::RemoteSigningService => {
                let base = policy.signing_service_url.as_deref().unwrap_or_default();
                for (attr, operation) in ADVERTISED_OPERATIONS {
                    map.insert(attr.into(), json!(endpoint(base, operation)));
                }
                if let Some(token) = &new_keys.signing_token {
                    map.insert("oxElevenTestModeToken".into(), json!(token.as_str()));
                }
                map.insert("webKeysStorage".into(), json!("pkcs11"));
            }
            RotationBackend::LocalKeystore => {
                map.insert("webKeysStorage".into(), json!("keystore"));
                if let Some(secret) = &new_keys.keystore_secret {
                    map.insert("keyStoreSecret".into(), json!(secret.as_str()));
                }
            }
        }
        Ok(())
    }

    /// Copy the new keystore to every authentication-service host
    async fn distribute_keystore(&self, log: &TaskLogger) -> Result<()> {
        let keystore = &self.ctx.config.paths.keystore_path;
        for node in self.ctx.store.auth_nodes.list().await? {
            self.copy_keystore(log, &node, keystore).await;
        }
        Ok(())
    }

    async fn copy_keystore(&self, log: &TaskLogger, node: &AuthServiceNode, keystore: &std::path::Path) {
        let destination = node.keystore_destination();
        // destination already carries the container prefix
        let shell = match self.ctx.remote.open(&node.hostname, None).await {
            Ok(shell) => shell,
            Err(e) => {
                warn!(host = %node.hostname, error = %e, "Keystore distribution skipped");
                log.error(format!("Cannot establish SSH connection to {}: {}", node.hostname, e)).await;
                return;
            }
        };
        match shell.upload(keystore, &destination).await {
            Ok(()) => log.success(format!("Copied the keystore to {}:{}", node.hostname, destination)).await,
            Err(e) => log.error(format!("Copying the keystore to {} failed: {}", node.hostname, e)).await,
        }
        shell.close().await;
    }
}
