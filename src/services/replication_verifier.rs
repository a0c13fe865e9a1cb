//! Replication Verifier
//!
//! Writes a canary entry on each provider, polls every consumer of that
//! provider until the canary shows up, then deletes it and polls again until
//! it is gone. Any miss fails the run; the outcome is persisted as the fleet's
//! last test result.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::context::FleetContext;
use crate::directory::{Attributes, DirectoryError, Endpoint, ScopedConnection};
use crate::domain::ServerNode;
use crate::errors::Result;
use crate::observability::metrics;
use crate::tasks::{JobContext, LogLevel, TaskLogEntry};

const CANARY_RDN: &str = "cn=testentry";
const CANARY_ATTR: &str = "sn";
const CANARY_VALUE: &str = "gluu";

fn canary_dn(base_dn: &str) -> String {
    format!("{},{}", CANARY_RDN, base_dn)
}

fn canary_attributes() -> Attributes {
    vec![
        ("objectclass".to_string(), vec!["top".to_string(), "person".to_string()]),
        ("cn".to_string(), vec!["testentry".to_string()]),
        (CANARY_ATTR.to_string(), vec![CANARY_VALUE.to_string()]),
    ]
}

/// What the poll is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Present,
    Absent,
}

/// Canary presence; a missing entry compares as absent
async fn canary_present(conn: &mut ScopedConnection, dn: &str) -> std::result::Result<bool, DirectoryError> {
    match conn.compare(dn, CANARY_ATTR, CANARY_VALUE).await {
        Ok(found) => Ok(found),
        Err(DirectoryError::NoSuchObject { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

pub struct ReplicationVerifier {
    ctx: Arc<FleetContext>,
}

impl ReplicationVerifier {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self { ctx }
    }

    /// Run the canary round trip over every provider and its consumers
    #[instrument(skip_all, fields(task_id = %job.task_id))]
    pub async fn verify(&self, job: &JobContext) -> Result<bool> {
        let log = &job.log;
        let topology = self.ctx.store.topology().await?;
        let dn = canary_dn(&self.ctx.config.directory.base_dn);

        log.info("Listing all providers").await;
        let providers: Vec<&ServerNode> = topology.providers().collect();
        log.info(format!("Available providers: {}", providers.len())).await;

        let mut passed = true;
        for provider in providers {
            job.checkpoint()?;
            let consumers = topology.consumers_of(provider.id);
            passed &= self.verify_provider(job, provider, &consumers, &dn).await?;
        }

        log.success("Replication test Complete.").await;
        if self.ctx.store.fleet.get().await?.is_some() {
            self.ctx.store.fleet.set_last_test(passed).await?;
        }
        metrics::record_replication_check(passed);
        info!(passed, "Replication check finished");
        Ok(passed)
    }

    async fn verify_provider(
        &self,
        job: &JobContext,
        provider: &ServerNode,
        consumers: &[&ServerNode],
        dn: &str,
    ) -> Result<bool> {
        let log = &job.log;
        let credentials = self.ctx.root_credentials(&provider.admin_password);

        let mut conn =
            match self.ctx.directory.connect(&Endpoint::from(provider), &credentials).await {
                Ok(conn) => conn,
                Err(e) => {
                    log.error(format!("Failed to connect to {}. {}", provider.hostname, e)).await;
                    return Ok(false);
                }
            };

        if let Err(e) = conn.add(dn, canary_attributes()).await {
            log.error(format!("Adding the test entry {} failed: {}", dn, e)).await;
            conn.release().await;
            for consumer in consumers {
                log.entry(
                    TaskLogEntry::new(
                        LogLevel::Warning,
                        format!(
                            "Skipping {}: no test entry on provider {}",
                            consumer.hostname, provider.hostname
                        ),
                    )
                    .with("host", &consumer.hostname),
                )
                .await;
            }
            return Ok(false);
        }
        log.entry(
            TaskLogEntry::new(
                LogLevel::Success,
                format!("Adding the test entry {} to the provider", dn),
            )
            .with("host", &provider.hostname),
        )
        .await;

        let mut passed = true;
        let total = consumers.len();
        for (i, consumer) in consumers.iter().enumerate() {
            job.checkpoint()?;
            log.info(format!("Verifying data in consumers: {} of {}", i + 1, total)).await;
            if !self.poll_consumer(job, consumer, dn, Expect::Present).await? {
                log.entry(
                    TaskLogEntry::new(
                        LogLevel::Error,
                        format!("Test data is NOT replicated on {}", consumer.hostname),
                    )
                    .with("host", &consumer.hostname),
                )
                .await;
                passed = false;
            }
        }

        let deleted = match conn.delete(dn).await {
            Ok(()) | Err(DirectoryError::NoSuchObject { .. }) => canary_present(&mut conn, dn).await,
            Err(e) => Err(e),
        };
        conn.release().await;
        match deleted {
            Ok(false) => {
                log.success(format!("Deleting test data from provider: {}", provider.hostname))
                    .await
            }
            Ok(true) => {
                log.error("Delete operation failed. Data exists.").await;
                passed = false;
            }
            Err(e) => {
                log.error(format!("Deleting test data from {} failed: {}", provider.hostname, e))
                    .await;
                passed = false;
            }
        }

        for (i, consumer) in consumers.iter().enumerate() {
            job.checkpoint()?;
            log.info(format!("Verifying data is removed from consumers: {} of {}", i + 1, total))
                .await;
            if self.poll_consumer(job, consumer, dn, Expect::Absent).await? {
                log.success(format!("Test data removed from the consumer: {}", consumer.hostname))
                    .await;
            } else {
                log.error(format!(
                    "Failed to remove test data from consumer: {}",
                    consumer.hostname
                ))
                .await;
                passed = false;
            }
        }

        Ok(passed)
    }

    /// Poll a consumer until the canary matches `expect`. Connection
    /// failures are logged and count as a miss.
    async fn poll_consumer(
        &self,
        job: &JobContext,
        consumer: &ServerNode,
        dn: &str,
        expect: Expect,
    ) -> Result<bool> {
        let log = &job.log;
        let settings = &self.ctx.config.verifier;
        let credentials = self.ctx.root_credentials(&consumer.admin_password);

        let mut conn =
            match self.ctx.directory.connect(&Endpoint::from(consumer), &credentials).await {
                Ok(conn) => conn,
                Err(e) => {
                    log.error(format!("Failed to connect to {}. {}", consumer.hostname, e)).await;
                    return Ok(false);
                }
            };

        let mut matched = false;
        for attempt in 1..=settings.attempts {
            let present = match canary_present(&mut conn, dn).await {
                Ok(present) => present,
                Err(e) => {
                    log.error(format!("Query against {} failed: {}", consumer.hostname, e)).await;
                    break;
                }
            };
            if present == (expect == Expect::Present) {
                matched = true;
                break;
            }
            if expect == Expect::Present {
                log.entry(
                    TaskLogEntry::new(LogLevel::Warning, "Test data not found. Retrying...")
                        .with("host", &consumer.hostname),
                )
                .await;
            }
            if attempt < settings.attempts {
                tokio::select! {
                    _ = job.cancel.cancelled() => break,
                    _ = tokio::time::sleep(settings.retry_delay()) => {}
                }
            }
        }
        conn.release().await;

        if matched && expect == Expect::Present {
            log.entry(
                TaskLogEntry::new(LogLevel::Success, "Test data is replicated and available")
                    .with("host", &consumer.hostname),
            )
            .await;
        }
        job.checkpoint()?;
        Ok(matched)
    }
}
