//! # Directory Client
//!
//! Scoped, bound sessions against fleet directory servers. A
//! [`DirectoryConnector`] opens one transport with one scheme; the
//! [`DirectoryClient`] walks the node protocol's fallback plan and hands back
//! a [`ScopedConnection`] that is always unbound.

pub mod client;
pub mod error;
pub mod ldap;
pub mod types;

pub use client::{DirectoryClient, DirectoryConnector, DirectorySession, ScopedConnection};
pub use error::DirectoryError;
pub use ldap::Ldap3Connector;
pub use types::{
    Attributes, Credentials, Endpoint, Modification, Scheme, SearchEntry, SearchScope,
};
