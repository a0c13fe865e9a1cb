//! Fleet host records
//!
//! `ServerNode` is a directory server managed by the engine; `AuthServiceNode`
//! is a host of the authentication service that only receives rotated key
//! material.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Root of a containerized installation on the host filesystem
pub fn container_root(version: &str) -> String {
    format!("/opt/gluu-server-{}", version)
}

/// Directory transport used to reach a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Clear-text `ldap://`
    Plain,
    /// `ldaps://` from the first byte
    TlsDirect,
    /// `ldap://` upgraded with the StartTLS extended operation
    #[serde(rename = "starttls")]
    StartTls,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::TlsDirect => "tls-direct",
            Self::StartTls => "starttls",
        }
    }

    /// Whether replication traffic to this node needs the provider certificate
    pub fn requires_certificate(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" | "ldap" => Ok(Self::Plain),
            "tls-direct" | "ldaps" => Ok(Self::TlsDirect),
            "starttls" => Ok(Self::StartTls),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Replication role of a directory node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Provider,
    Consumer,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Consumer => "consumer",
        }
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider" | "master" => Ok(Self::Provider),
            "consumer" => Ok(Self::Consumer),
            _ => Err(format!("Unknown node role: {}", s)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional TLS material paths declared for a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
}

impl TlsMaterial {
    /// Declared paths in a stable order
    pub fn declared_paths(&self) -> Vec<&str> {
        [&self.ca_cert, &self.server_cert, &self.server_key]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// A directory server in the fleet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNode {
    pub id: i64,
    pub hostname: String,
    pub ip: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
    pub role: NodeRole,
    #[serde(skip_serializing)]
    pub admin_password: String,
    pub tls: TlsMaterial,
    pub containerized: bool,
    pub container_version: Option<String>,
    pub initialized: bool,
    pub provisioned: bool,
    pub provider_id: Option<i64>,
}

impl ServerNode {
    pub fn is_provider(&self) -> bool {
        self.role == NodeRole::Provider
    }

    /// Host the directory client and remote shell should address
    pub fn address(&self) -> &str {
        self.ip.as_deref().filter(|ip| !ip.is_empty()).unwrap_or(&self.hostname)
    }

    /// Container root for containerized hosts
    pub fn container_root(&self) -> Option<String> {
        if !self.containerized {
            return None;
        }
        self.container_version.as_deref().map(container_root)
    }
}

impl fmt::Debug for ServerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerNode")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("role", &self.role)
            .field("admin_password", &"[REDACTED]")
            .field("containerized", &self.containerized)
            .field("initialized", &self.initialized)
            .field("provisioned", &self.provisioned)
            .field("provider_id", &self.provider_id)
            .finish()
    }
}

/// Registration payload for a new directory node
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewServerNode {
    #[validate(length(min = 1, max = 253, message = "Hostname must be 1-253 characters"))]
    pub hostname: String,
    pub ip: Option<String>,
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,
    pub protocol: Protocol,
    pub role: NodeRole,
    #[validate(length(min = 1, message = "Admin password cannot be empty"))]
    pub admin_password: String,
    #[serde(default)]
    pub tls: TlsMaterial,
    #[serde(default)]
    pub containerized: bool,
    pub container_version: Option<String>,
    pub provider_id: Option<i64>,
}

/// A host of the authentication service receiving rotated key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthServiceNode {
    pub id: i64,
    pub hostname: String,
    pub containerized: bool,
    pub container_version: Option<String>,
}

impl AuthServiceNode {
    pub const KEYSTORE_PATH: &'static str = "/etc/certs/oxauth-keys.jks";

    /// Remote path the generated keystore is copied to
    pub fn keystore_destination(&self) -> String {
        match (self.containerized, self.container_version.as_deref()) {
            (true, Some(version)) => format!("{}{}", container_root(version), Self::KEYSTORE_PATH),
            _ => Self::KEYSTORE_PATH.to_string(),
        }
    }
}
