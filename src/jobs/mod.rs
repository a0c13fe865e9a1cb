//! Fleet jobs
//!
//! Adapters from the executor's [`Job`] contract to the fleet services. Each
//! job validates its JSON arguments at submission and reports the service's
//! pass/fail flag as the task outcome.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::FleetContext;
use crate::errors::{FleetError, Result};
use crate::services::{
    FleetProvisioner, KeyRotator, ProviderInitializer, ReplicationVerifier,
};
use crate::tasks::{flag_arg, id_arg, Job, JobContext, JobKind, JobOutcome, JobRegistry};

/// Provision one directory node. Args: `{"server_id": <id>}`
pub struct ProvisionJob {
    ctx: Arc<FleetContext>,
}

#[async_trait]
impl Job for ProvisionJob {
    fn kind(&self) -> &str {
        JobKind::Provision.as_str()
    }

    fn validate_args(&self, args: &Value) -> Result<()> {
        id_arg(args, "server_id").map(|_| ())
    }

    async fn run(&self, ctx: JobContext, args: Value) -> Result<JobOutcome> {
        let server_id = id_arg(&args, "server_id")?;
        let provisioned =
            FleetProvisioner::new(Arc::clone(&self.ctx)).provision(&ctx, server_id).await?;
        Ok(JobOutcome::from_flag(
            provisioned,
            json!({"server_id": server_id, "provisioned": provisioned}),
        ))
    }
}

/// Initialize a provider. Args: `{"server_id": <id>, "use_ldif": <bool>}`
pub struct InitializeProviderJob {
    ctx: Arc<FleetContext>,
}

#[async_trait]
impl Job for InitializeProviderJob {
    fn kind(&self) -> &str {
        JobKind::InitializeProvider.as_str()
    }

    fn validate_args(&self, args: &Value) -> Result<()> {
        id_arg(args, "server_id").map(|_| ())
    }

    async fn run(&self, ctx: JobContext, args: Value) -> Result<JobOutcome> {
        let server_id = id_arg(&args, "server_id")?;
        let use_ldif = flag_arg(&args, "use_ldif");
        let initialized = ProviderInitializer::new(Arc::clone(&self.ctx))
            .initialize(&ctx, server_id, use_ldif)
            .await?;
        Ok(JobOutcome::from_flag(
            initialized,
            json!({"server_id": server_id, "initialized": initialized}),
        ))
    }
}

/// Canary round trip across the fleet. No args.
pub struct VerifyReplicationJob {
    ctx: Arc<FleetContext>,
}

#[async_trait]
impl Job for VerifyReplicationJob {
    fn kind(&self) -> &str {
        JobKind::VerifyReplication.as_str()
    }

    async fn run(&self, ctx: JobContext, _args: Value) -> Result<JobOutcome> {
        let passed = ReplicationVerifier::new(Arc::clone(&self.ctx)).verify(&ctx).await?;
        Ok(JobOutcome::from_flag(passed, json!({"passed": passed})))
    }
}

/// Rotate signing keys. Args: `{"policy_id": <id>?, "force": <bool>}`;
/// without `policy_id` the first policy is used.
pub struct RotateKeysJob {
    ctx: Arc<FleetContext>,
}

#[async_trait]
impl Job for RotateKeysJob {
    fn kind(&self) -> &str {
        JobKind::RotateKeys.as_str()
    }

    fn validate_args(&self, args: &Value) -> Result<()> {
        match args.get("policy_id") {
            None | Some(Value::Null) => Ok(()),
            Some(_) => id_arg(args, "policy_id").map(|_| ()),
        }
    }

    async fn run(&self, ctx: JobContext, args: Value) -> Result<JobOutcome> {
        let policy_id = match args.get("policy_id").and_then(Value::as_i64) {
            Some(id) => id,
            None => match self.ctx.store.policies.first().await? {
                Some(policy) => policy.id,
                None => {
                    ctx.log.warning("No key rotation policy is configured").await;
                    return Err(FleetError::not_found("RotationPolicy", "first"));
                }
            },
        };
        let force = flag_arg(&args, "force");
        let outcome =
            KeyRotator::new(Arc::clone(&self.ctx)).rotate(&ctx, policy_id, force).await?;
        Ok(JobOutcome::from_flag(
            outcome.is_ok(),
            json!({"policy_id": policy_id, "outcome": outcome.as_str()}),
        ))
    }
}

/// Register every fleet job against one shared context
pub fn register_fleet_jobs(registry: &mut JobRegistry, ctx: Arc<FleetContext>) {
    registry
        .register(Arc::new(ProvisionJob { ctx: Arc::clone(&ctx) }))
        .register(Arc::new(InitializeProviderJob { ctx: Arc::clone(&ctx) }))
        .register(Arc::new(VerifyReplicationJob { ctx: Arc::clone(&ctx) }))
        .register(Arc::new(RotateKeysJob { ctx }));
}
