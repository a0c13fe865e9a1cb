//! Directory request and response types

use crate::domain::{Protocol, ServerNode};
use std::collections::HashMap;
use std::fmt;

/// Concrete connection scheme for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ldap,
    LdapStartTls,
    Ldaps,
}

impl Scheme {
    pub fn url(&self, host: &str, port: u16) -> String {
        match self {
            Self::Ldap | Self::LdapStartTls => format!("ldap://{}:{}", host, port),
            Self::Ldaps => format!("ldaps://{}:{}", host, port),
        }
    }

    /// Schemes to try, in order, for a node protocol. Later entries are only
    /// attempted after an earlier one reports the server unreachable.
    pub fn plan(protocol: Protocol) -> &'static [Scheme] {
        match protocol {
            Protocol::Plain => &[Scheme::Ldap, Scheme::Ldaps],
            Protocol::StartTls => &[Scheme::LdapStartTls, Scheme::Ldaps],
            Protocol::TlsDirect => &[Scheme::Ldaps],
        }
    }
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self { host: host.into(), port, protocol }
    }
}

impl From<&ServerNode> for Endpoint {
    fn from(node: &ServerNode) -> Self {
        Self::new(node.address(), node.port, node.protocol)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.protocol)
    }
}

/// Simple-bind credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub bind_dn: String,
    pub password: String,
}

impl Credentials {
    pub fn new(bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self { bind_dn: bind_dn.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bind_dn", &self.bind_dn)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// First entry returned by a search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl SearchEntry {
    /// First value of an attribute (case-insensitive name)
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// Attribute list for an add operation
pub type Attributes = Vec<(String, Vec<String>)>;

/// One change in a modify operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Add(String, Vec<String>),
    Replace(String, Vec<String>),
    Delete(String, Vec<String>),
}

impl Modification {
    pub fn replace(attr: &str, values: impl IntoIterator<Item = String>) -> Self {
        Self::Replace(attr.to_string(), values.into_iter().collect())
    }

    pub fn add(attr: &str, values: impl IntoIterator<Item = String>) -> Self {
        Self::Add(attr.to_string(), values.into_iter().collect())
    }

    pub fn attribute(&self) -> &str {
        match self {
            Self::Add(a, _) | Self::Replace(a, _) | Self::Delete(a, _) => a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_fall_back_to_ldaps() {
        assert_eq!(Scheme::plan(Protocol::Plain), &[Scheme::Ldap, Scheme::Ldaps]);
        assert_eq!(Scheme::plan(Protocol::StartTls), &[Scheme::LdapStartTls, Scheme::Ldaps]);
        assert_eq!(Scheme::plan(Protocol::TlsDirect), &[Scheme::Ldaps]);
    }

    #[test]
    fn scheme_urls() {
        assert_eq!(Scheme::LdapStartTls.url("h", 389), "ldap://h:389");
        assert_eq!(Scheme::Ldaps.url("h", 1636), "ldaps://h:1636");
    }

    #[test]
    fn first_value_is_case_insensitive() {
        let mut entry = SearchEntry { dn: "cn=x".into(), ..Default::default() };
        entry.attrs.insert("oxRevision".into(), vec!["7".into()]);
        assert_eq!(entry.first("oxrevision"), Some("7"));
        assert_eq!(entry.first("missing"), None);
    }

    #[test]
    fn credentials_debug_redacts() {
        let rendered = format!("{:?}", Credentials::new("cn=admin", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
