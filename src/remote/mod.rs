//! # Remote Execution Client
//!
//! Per-host shell sessions used to stage files and drive services on fleet
//! nodes. [`RemoteConnector`] is the seam; [`OpenSshConnector`] drives the
//! system `ssh`/`scp` binaries.

pub mod client;
pub mod command;
pub mod error;
pub mod ssh;

pub use client::{RemoteClient, RemoteConnector, RemoteSession};
pub use command::{shell_quote, CommandOutput, HostShell};
pub use error::RemoteError;
pub use ssh::OpenSshConnector;
