//! `ldap3`-backed directory connector

use super::client::{DirectoryConnector, DirectorySession};
use super::error::{rc, DirectoryError};
use super::types::{Attributes, Credentials, Endpoint, Modification, Scheme, SearchEntry, SearchScope};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, Scope};
use std::collections::HashSet;
use std::time::Duration;

type DirResult<T> = std::result::Result<T, DirectoryError>;

/// Connector over `ldap3`. Server certificates are not verified: fleet nodes
/// commonly run with self-signed certificates.
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    timeout: Duration,
}

impl Ldap3Connector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn op_error(dn: &str, err: LdapError) -> DirectoryError {
    match err {
        LdapError::LdapResult { result } => DirectoryError::from_code(result.rc, dn, &result.text),
        other => DirectoryError::unreachable(dn, other),
    }
}

fn check(dn: &str, result: LdapResult) -> DirResult<()> {
    if result.rc == rc::SUCCESS {
        Ok(())
    } else {
        Err(DirectoryError::from_code(result.rc, dn, &result.text))
    }
}

fn value_set(values: Vec<String>) -> HashSet<String> {
    values.into_iter().collect()
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        scheme: Scheme,
        credentials: &Credentials,
    ) -> DirResult<Box<dyn DirectorySession>> {
        let url = scheme.url(&endpoint.host, endpoint.port);
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(scheme == Scheme::LdapStartTls)
            .set_no_tls_verify(true);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| DirectoryError::unreachable(&url, e))?;
        ldap3::drive!(conn);

        let result = ldap
            .with_timeout(self.timeout)
            .simple_bind(&credentials.bind_dn, &credentials.password)
            .await
            .map_err(|e| DirectoryError::unreachable(&url, e))?;
        check(&credentials.bind_dn, result)?;

        Ok(Box::new(Ldap3Session { ldap, timeout: self.timeout }))
    }
}

struct Ldap3Session {
    ldap: Ldap,
    timeout: Duration,
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> DirResult<Option<SearchEntry>> {
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        };
        let attrs: Vec<&str> = if attrs.is_empty() { vec!["*"] } else { attrs.to_vec() };

        let result = self
            .ldap
            .with_timeout(self.timeout)
            .search(base, scope, filter, attrs)
            .await
            .map_err(|e| op_error(base, e))?;

        let (entries, status) = (result.0, result.1);
        match status.rc {
            rc::SUCCESS => {}
            rc::NO_SUCH_OBJECT => return Ok(None),
            code => return Err(DirectoryError::from_code(code, base, &status.text)),
        }

        Ok(entries.into_iter().next().map(|raw| {
            let entry = ldap3::SearchEntry::construct(raw);
            SearchEntry { dn: entry.dn, attrs: entry.attrs }
        }))
    }

    async fn compare(&mut self, dn: &str, attr: &str, value: &str) -> DirResult<bool> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .compare(dn, attr, value)
            .await
            .map_err(|e| op_error(dn, e))?;

        match result.0.rc {
            rc::COMPARE_TRUE => Ok(true),
            rc::COMPARE_FALSE => Ok(false),
            code => Err(DirectoryError::from_code(code, dn, &result.0.text)),
        }
    }

    async fn add(&mut self, dn: &str, attrs: Attributes) -> DirResult<()> {
        let attrs: Vec<(String, HashSet<String>)> =
            attrs.into_iter().map(|(name, values)| (name, value_set(values))).collect();
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .add(dn, attrs)
            .await
            .map_err(|e| op_error(dn, e))?;
        check(dn, result)
    }

    async fn delete(&mut self, dn: &str) -> DirResult<()> {
        let result =
            self.ldap.with_timeout(self.timeout).delete(dn).await.map_err(|e| op_error(dn, e))?;
        check(dn, result)
    }

    async fn modify(&mut self, dn: &str, mods: Vec<Modification>) -> DirResult<()> {
        let mods: Vec<Mod<String>> = mods
            .into_iter()
            .map(|m| match m {
                Modification::Add(attr, values) => Mod::Add(attr, value_set(values)),
                Modification::Replace(attr, values) => Mod::Replace(attr, value_set(values)),
                Modification::Delete(attr, values) => Mod::Delete(attr, value_set(values)),
            })
            .collect();
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .modify(dn, mods)
            .await
            .map_err(|e| op_error(dn, e))?;
        check(dn, result)
    }

    async fn unbind(&mut self) -> DirResult<()> {
        self.ldap.unbind().await.map_err(|e| DirectoryError::unreachable("unbind", e))
    }
}
