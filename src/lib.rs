//! # dirfleet
//!
//! Orchestration engine for a fleet of replicated directory servers. It
//! provisions nodes over SSH, initializes providers, verifies replication
//! with a canary entry and rotates the signing keys of the authentication
//! service that reads its configuration from the directory.
//!
//! ## Architecture
//!
//! ```text
//! JSON API / CLI → Executor (worker pool) → Jobs → Provisioner / Verifier / Key Rotator
//!                        ↓                            ↓                ↓
//!                  Task Log Store            Directory Client    Remote Execution Client
//! ```
//!
//! Every component is built from one [`context::FleetContext`] created at
//! process start.

pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod jobs;
pub mod observability;
pub mod remote;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use context::FleetContext;
pub use errors::{FleetError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "dirfleet");
    }
}
