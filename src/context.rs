//! Process-wide handles shared by every job

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::directory::{Credentials, DirectoryClient, Ldap3Connector};
use crate::remote::{OpenSshConnector, RemoteClient};
use crate::services::secret_cipher::SecretCipher;
use crate::storage::{DbPool, FleetStore};
use crate::tasks::{SqlTaskLogStore, TaskLogStore};

/// Built once at startup and handed to every component by `Arc`
pub struct FleetContext {
    pub config: Arc<AppConfig>,
    pub store: FleetStore,
    pub directory: DirectoryClient,
    pub remote: RemoteClient,
    pub cipher: SecretCipher,
    pub log_store: Arc<dyn TaskLogStore>,
    rotation_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for FleetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetContext")
            .field("directory", &self.directory)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl FleetContext {
    pub fn new(
        config: Arc<AppConfig>,
        store: FleetStore,
        directory: DirectoryClient,
        remote: RemoteClient,
        log_store: Arc<dyn TaskLogStore>,
    ) -> Self {
        Self {
            config,
            store,
            directory,
            remote,
            cipher: SecretCipher::new(),
            log_store,
            rotation_locks: DashMap::new(),
        }
    }

    /// Production wiring: ldap3 directory sessions, OpenSSH remote sessions
    /// and the SQL task log store.
    pub fn from_config(config: AppConfig, pool: DbPool) -> Self {
        let directory = DirectoryClient::new(Arc::new(Ldap3Connector::new(
            config.directory.operation_timeout(),
        )));
        let remote = RemoteClient::new(
            Arc::new(OpenSshConnector::new(config.remote.clone())),
            config.remote.user.clone(),
        );
        let log_store: Arc<dyn TaskLogStore> = Arc::new(SqlTaskLogStore::new(pool.clone()));
        Self::new(Arc::new(config), FleetStore::new(pool), directory, remote, log_store)
    }

    /// Root-DN credentials for a directory node
    pub fn root_credentials(&self, admin_password: &str) -> Credentials {
        Credentials::new(&self.config.directory.root_dn, admin_password)
    }

    /// Per-policy rotation guard
    pub fn rotation_lock(&self, policy_id: i64) -> Arc<Mutex<()>> {
        self.rotation_locks.entry(policy_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestFleet;

    #[tokio::test]
    async fn rotation_lock_is_shared_per_policy() {
        let fleet = TestFleet::new().await;
        let a = fleet.ctx.rotation_lock(1);
        let b = fleet.ctx.rotation_lock(1);
        let other = fleet.ctx.rotation_lock(2);

        let _held = a.try_lock().unwrap();
        assert!(b.try_lock().is_err());
        assert!(other.try_lock().is_ok());
    }
}
