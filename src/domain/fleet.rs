//! Fleet-wide settings and the provider/consumer topology
//!
//! Nodes reference their provider by id. [`Topology`] holds a snapshot of
//! every node keyed by id and derives the reverse `consumers_of` index on
//! demand.

use super::node::{NodeRole, ServerNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Replication topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    /// One provider, any number of consumers
    #[default]
    Single,
    /// Two providers replicating to each other
    Mirror,
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Mirror => "mirror",
        }
    }

    pub fn max_providers(&self) -> usize {
        match self {
            Self::Single => 1,
            Self::Mirror => 2,
        }
    }
}

impl FromStr for TopologyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "mirror" | "delta" => Ok(Self::Mirror),
            _ => Err(format!("Unknown topology: {}", s)),
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Singleton fleet settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    pub replication_dn: String,
    #[serde(skip_serializing)]
    pub replication_password: String,
    pub topology: TopologyKind,
    pub cert_folder: String,
    pub last_test: Option<bool>,
}

impl FleetConfig {
    /// `cn` value of the replication manager entry
    pub fn replication_cn(&self) -> &str {
        self.replication_dn
            .split(',')
            .next()
            .and_then(|rdn| rdn.split_once('='))
            .map(|(_, value)| value.trim())
            .unwrap_or("replicator")
    }
}

impl fmt::Debug for FleetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetConfig")
            .field("replication_dn", &self.replication_dn)
            .field("replication_password", &"[REDACTED]")
            .field("topology", &self.topology)
            .field("cert_folder", &self.cert_folder)
            .field("last_test", &self.last_test)
            .finish()
    }
}

/// Structural problems found in a topology snapshot
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyViolation {
    #[error("consumer {node} has no provider")]
    ConsumerWithoutProvider { node: i64 },
    #[error("node {node} references missing provider {provider}")]
    DanglingProvider { node: i64, provider: i64 },
    #[error("node {node} references {provider}, which is not a provider")]
    ProviderIsConsumer { node: i64, provider: i64 },
    #[error("{kind} topology allows {max} provider(s), found {found}")]
    TooManyProviders { kind: TopologyKind, max: usize, found: usize },
}

/// Snapshot of every directory node, keyed by id
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<i64, ServerNode>,
}

impl Topology {
    pub fn new(nodes: impl IntoIterator<Item = ServerNode>) -> Self {
        Self { nodes: nodes.into_iter().map(|n| (n.id, n)).collect() }
    }

    pub fn get(&self, id: i64) -> Option<&ServerNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ServerNode> {
        self.nodes.values()
    }

    /// Providers in id order
    pub fn providers(&self) -> impl Iterator<Item = &ServerNode> {
        self.nodes.values().filter(|n| n.role == NodeRole::Provider)
    }

    /// Consumers replicating from `provider_id`, in id order
    pub fn consumers_of(&self, provider_id: i64) -> Vec<&ServerNode> {
        self.nodes
            .values()
            .filter(|n| n.role == NodeRole::Consumer && n.provider_id == Some(provider_id))
            .collect()
    }

    /// The node's provider, if it has one
    pub fn provider_of(&self, node: &ServerNode) -> Option<&ServerNode> {
        node.provider_id.and_then(|id| self.nodes.get(&id))
    }

    /// The other provider of a mirrored pair
    pub fn mirror_peer(&self, provider: &ServerNode) -> Option<&ServerNode> {
        self.providers().find(|p| p.id != provider.id)
    }

    /// Check reference integrity and provider count for `kind`
    pub fn violations(&self, kind: TopologyKind) -> Vec<TopologyViolation> {
        let mut found = Vec::new();
        for node in self.nodes.values() {
            match (node.role, node.provider_id) {
                (NodeRole::Consumer, None) => {
                    found.push(TopologyViolation::ConsumerWithoutProvider { node: node.id })
                }
                (_, Some(provider)) => match self.nodes.get(&provider) {
                    None => {
                        found.push(TopologyViolation::DanglingProvider { node: node.id, provider })
                    }
                    Some(p) if p.role != NodeRole::Provider => found
                        .push(TopologyViolation::ProviderIsConsumer { node: node.id, provider }),
                    Some(_) => {}
                },
                (NodeRole::Provider, None) => {}
            }
        }

        let providers = self.providers().count();
        if providers > kind.max_providers() {
            found.push(TopologyViolation::TooManyProviders {
                kind,
                max: kind.max_providers(),
                found: providers,
            });
        }
        found
    }
}
