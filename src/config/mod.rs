//! # Configuration Management
//!
//! Environment-driven configuration for the dirfleet engine. Every setting is
//! read from a `DIRFLEET_*` variable; a `.env` file in the working directory is
//! loaded first when present.

pub mod settings;

pub use settings::{
    ApiConfig, AppConfig, DatabaseConfig, DirectorySettings, ExecutorConfig, ObservabilityConfig,
    PathsConfig, RemoteConfig, RotationConfig, VerifierConfig,
};

use crate::errors::Result;

/// Load `.env` (if any) and build a validated [`AppConfig`].
pub fn load() -> Result<AppConfig> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to read .env file");
        }
    }
    AppConfig::from_env()
}
