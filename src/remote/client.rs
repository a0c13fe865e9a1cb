//! Remote shell traits and the connection factory

use super::command::{CommandOutput, HostShell};
use super::error::RemoteError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// An open shell session on one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    async fn exists(&self, path: &str) -> Result<bool, RemoteError>;

    /// Release the session; errors are swallowed
    async fn close(&self);
}

#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, host: &str, user: &str) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Opens [`HostShell`]s for fleet hosts
#[derive(Clone)]
pub struct RemoteClient {
    connector: Arc<dyn RemoteConnector>,
    user: String,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient").field("user", &self.user).finish_non_exhaustive()
    }
}

impl RemoteClient {
    pub fn new(connector: Arc<dyn RemoteConnector>, user: impl Into<String>) -> Self {
        Self { connector, user: user.into() }
    }

    pub async fn open(
        &self,
        host: &str,
        container_root: Option<String>,
    ) -> Result<HostShell, RemoteError> {
        let session = self.connector.connect(host, &self.user).await?;
        Ok(HostShell::new(session, container_root))
    }
}
