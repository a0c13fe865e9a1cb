//! Scoped directory connections with transport fallback

use super::error::DirectoryError;
use super::types::{Attributes, Credentials, Endpoint, Modification, Scheme, SearchEntry, SearchScope};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

type DirResult<T> = std::result::Result<T, DirectoryError>;

/// A bound directory session
#[async_trait]
pub trait DirectorySession: Send {
    /// First matching entry, or `None` when nothing (or no base object) matches
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> DirResult<Option<SearchEntry>>;

    async fn compare(&mut self, dn: &str, attr: &str, value: &str) -> DirResult<bool>;

    async fn add(&mut self, dn: &str, attrs: Attributes) -> DirResult<()>;

    async fn delete(&mut self, dn: &str) -> DirResult<()>;

    async fn modify(&mut self, dn: &str, mods: Vec<Modification>) -> DirResult<()>;

    async fn unbind(&mut self) -> DirResult<()>;
}

/// Opens a transport with one scheme and performs a simple bind
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn open(
        &self,
        endpoint: &Endpoint,
        scheme: Scheme,
        credentials: &Credentials,
    ) -> DirResult<Box<dyn DirectorySession>>;
}

/// Connection factory applying the per-protocol fallback plan
#[derive(Clone)]
pub struct DirectoryClient {
    connector: Arc<dyn DirectoryConnector>,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient").finish_non_exhaustive()
    }
}

impl DirectoryClient {
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> Self {
        Self { connector }
    }

    /// Connect and bind, falling back to the next scheme only when the
    /// previous one reports the server unreachable. Bind failures return
    /// immediately.
    #[instrument(skip(self, credentials), fields(endpoint = %endpoint, bind_dn = %credentials.bind_dn))]
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> DirResult<ScopedConnection> {
        let mut last_error = None;
        for scheme in Scheme::plan(endpoint.protocol) {
            match self.connector.open(endpoint, *scheme, credentials).await {
                Ok(session) => {
                    debug!(scheme = ?scheme, "Directory session bound");
                    return Ok(ScopedConnection { session: Some(session), scheme: *scheme });
                }
                Err(e) if e.is_unreachable() => {
                    warn!(scheme = ?scheme, error = %e, "Directory server unreachable, trying next scheme");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            DirectoryError::unreachable(endpoint.to_string(), "no connection scheme available")
        }))
    }
}

/// A bound session released on every exit path.
///
/// Call [`ScopedConnection::release`] to unbind in line; a connection dropped
/// without it is unbound on a background task.
pub struct ScopedConnection {
    session: Option<Box<dyn DirectorySession>>,
    scheme: Scheme,
}

impl ScopedConnection {
    /// Scheme the session ended up using
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn session(&mut self) -> DirResult<&mut Box<dyn DirectorySession>> {
        self.session.as_mut().ok_or_else(|| DirectoryError::Protocol {
            code: 0,
            message: "connection already released".to_string(),
        })
    }

    pub async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> DirResult<Option<SearchEntry>> {
        self.session()?.search(base, scope, filter, attrs).await
    }

    pub async fn compare(&mut self, dn: &str, attr: &str, value: &str) -> DirResult<bool> {
        self.session()?.compare(dn, attr, value).await
    }

    pub async fn add(&mut self, dn: &str, attrs: Attributes) -> DirResult<()> {
        self.session()?.add(dn, attrs).await
    }

    pub async fn delete(&mut self, dn: &str) -> DirResult<()> {
        self.session()?.delete(dn).await
    }

    pub async fn modify(&mut self, dn: &str, mods: Vec<Modification>) -> DirResult<()> {
        self.session()?.modify(dn, mods).await
    }

    /// Unbind now
    pub async fn release(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.unbind().await {
                debug!(error = %e, "Unbind failed");
            }
        }
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = session.unbind().await;
                });
            }
        }
    }
}
