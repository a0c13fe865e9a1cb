//! # Error Handling
//!
//! Error types for the dirfleet engine. Component-level failures
//! (directory, remote shell, signing service, cipher) are typed in their own
//! modules and fold into [`FleetError`] through `From` conversions.

pub mod types;

pub use types::{FleetError, Result};
