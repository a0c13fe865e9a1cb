//! # Repositories
//!
//! One repository per fleet record, each owning a clone of the pool.

pub mod active_key;
pub mod auth_service_node;
pub mod fleet_config;
pub mod rotation_policy;
pub mod server_node;

pub use active_key::ActiveKeyRepository;
pub use auth_service_node::AuthServiceNodeRepository;
pub use fleet_config::FleetConfigRepository;
pub use rotation_policy::{PolicyRequest, RotationPolicyRepository};
pub use server_node::ServerNodeRepository;
