//! Domain layer
//!
//! Records describing the managed fleet: directory nodes and their
//! replication topology, authentication-service hosts, fleet-wide settings and
//! the key rotation policy. These types carry no I/O.

pub mod fleet;
pub mod node;
pub mod rotation;

pub use fleet::{FleetConfig, Topology, TopologyKind, TopologyViolation};
pub use node::{
    container_root, AuthServiceNode, NewServerNode, NodeRole, Protocol, ServerNode, TlsMaterial,
};
pub use rotation::{ActiveKey, RotationBackend, RotationPolicy, SealedSecret};
