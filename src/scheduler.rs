//! Periodic key rotation check
//!
//! Every tick looks at the rotation policy and submits a `rotateKeys` job
//! with `force = false` when it is due. The job re-checks the due time under
//! the per-policy guard, so a manual rotation racing a tick is harmless.
//! Nobody polls scheduled tasks, so the scheduler collects the log of its own
//! task once it finishes.

use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::FleetContext;
use crate::errors::Result;
use crate::tasks::{Executor, JobKind};

pub struct RotationScheduler {
    ctx: Arc<FleetContext>,
    executor: Executor,
    /// Task id of the last submitted rotation while it may still be running
    in_flight: Option<String>,
}

impl RotationScheduler {
    pub fn new(ctx: Arc<FleetContext>, executor: Executor) -> Self {
        Self { ctx, executor, in_flight: None }
    }

    /// One scheduler tick. Returns the task id when a job was submitted.
    pub async fn tick(&mut self) -> Result<Option<String>> {
        if let Some(task_id) = self.in_flight.take() {
            match self.executor.state(&task_id) {
                Some(state) if !state.is_terminal() => {
                    debug!(task_id = %task_id, "Previous rotation still running");
                    self.in_flight = Some(task_id);
                    return Ok(None);
                }
                Some(_) => self.collect(&task_id).await,
                None => {}
            }
        }

        let policy = match self.ctx.store.policies.first().await? {
            Some(policy) => policy,
            None => {
                debug!("No rotation policy configured");
                return Ok(None);
            }
        };
        if !policy.should_rotate() {
            debug!(next_rotation_at = ?policy.next_rotation_at(), "Key rotation not due");
            return Ok(None);
        }

        let task_id = self.executor.submit(
            JobKind::RotateKeys.as_str(),
            json!({"policy_id": policy.id, "force": false}),
        )?;
        info!(task_id = %task_id, policy_id = policy.id, "Scheduled key rotation submitted");
        self.in_flight = Some(task_id.clone());
        Ok(Some(task_id))
    }

    /// Consume a finished rotation's log so the task and its entries are dropped
    async fn collect(&self, task_id: &str) {
        match self.executor.take_log(task_id).await {
            Ok(view) => {
                let failures = view.messages.iter().filter(|m| m.level.is_error()).count();
                info!(
                    task_id,
                    state = view.state.as_str(),
                    entries = view.messages.len(),
                    failures,
                    "Scheduled key rotation finished"
                );
            }
            Err(e) => warn!(task_id, error = %e, "Could not collect scheduled rotation log"),
        }
    }

    /// Tick until `shutdown` fires
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.ctx.config.rotation.tick_interval();
        tokio::spawn(async move {
            info!(tick_seconds = period.as_secs(), "Rotation scheduler started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "Rotation check failed, retrying next tick");
                        }
                    }
                }
            }
            info!("Rotation scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::domain::RotationBackend;
    use crate::jobs::register_fleet_jobs;
    use crate::storage::repositories::PolicyRequest;
    use crate::tasks::JobRegistry;
    use crate::testing::TestFleet;
    use chrono::Utc;

    async fn scheduler(fleet: &TestFleet) -> (RotationScheduler, crate::tasks::ExecutorHandle) {
        let mut registry = JobRegistry::new();
        register_fleet_jobs(&mut registry, fleet.ctx.clone());
        let (executor, handle) =
            Executor::start(&ExecutorConfig::default(), registry, fleet.ctx.log_store.clone());
        (RotationScheduler::new(fleet.ctx.clone(), executor), handle)
    }

    fn request() -> PolicyRequest {
        PolicyRequest {
            interval_days: 1,
            backend: RotationBackend::LocalKeystore,
            signing_service_url: None,
            inum_appliance: Some("@!1111".into()),
        }
    }

    #[tokio::test]
    async fn idle_without_policy() {
        let fleet = TestFleet::new().await;
        let (mut scheduler, handle) = scheduler(&fleet).await;
        assert_eq!(scheduler.tick().await.unwrap(), None);
        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test]
    async fn submits_only_when_due() {
        let fleet = TestFleet::new().await;
        let policy = fleet.ctx.store.policies.create(&request()).await.unwrap();
        fleet.ctx.store.policies.set_rotated_at(policy.id, Utc::now()).await.unwrap();
        let (mut scheduler, handle) = scheduler(&fleet).await;

        assert_eq!(scheduler.tick().await.unwrap(), None);

        fleet
            .ctx
            .store
            .policies
            .set_rotated_at(policy.id, Utc::now() - chrono::Duration::days(2))
            .await
            .unwrap();
        let task_id = scheduler.tick().await.unwrap().unwrap();
        assert_eq!(scheduler.executor.get_log(&task_id).await.unwrap().kind, "rotateKeys");

        handle.shutdown();
        handle.join().await;
    }

    async fn wait_finished(scheduler: &RotationScheduler, task_id: &str) {
        for _ in 0..500 {
            if scheduler.executor.state(task_id).is_some_and(|s| s.is_terminal()) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", task_id);
    }

    #[tokio::test]
    async fn repeated_failed_rotations_do_not_accumulate() {
        let fleet = TestFleet::new().await;
        // no signing service configured: every rotation yields no keys and the policy stays due
        let unconfigured = PolicyRequest { backend: RotationBackend::RemoteSigningService, ..request() };
        fleet.ctx.store.policies.create(&unconfigured).await.unwrap();
        let (mut scheduler, handle) = scheduler(&fleet).await;

        let mut submitted = Vec::new();
        for _ in 0..5 {
            let task_id = scheduler.tick().await.unwrap().unwrap();
            wait_finished(&scheduler, &task_id).await;
            assert!(fleet.logs.task_count() <= 1);
            assert_eq!(scheduler.executor.task_count(), 1);
            submitted.push(task_id);
        }

        scheduler.tick().await.unwrap();
        assert_eq!(scheduler.executor.state(&submitted[4]), None);

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_shutdown() {
        let fleet = TestFleet::new().await;
        let (scheduler, handle) = scheduler(&fleet).await;
        let shutdown = CancellationToken::new();
        let task = scheduler.spawn(shutdown.clone());
        shutdown.cancel();
        task.await.unwrap();
        handle.shutdown();
        handle.join().await;
    }
}
