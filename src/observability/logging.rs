//! # Structured Logging
//!
//! Span macros and subscriber setup for the tracing ecosystem. Job and node
//! spans carry the task id and hostname so process logs can be correlated with
//! the per-task log stream.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{FleetError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for a job execution.
///
/// ```rust,ignore
/// let span = job_span!("verifyReplication", task_id);
/// ```
#[macro_export]
macro_rules! job_span {
    ($kind:expr, $task_id:expr) => {
        tracing::info_span!("job", kind = %$kind, task_id = %$task_id)
    };
    ($kind:expr, $task_id:expr, $($field:tt)*) => {
        tracing::info_span!("job", kind = %$kind, task_id = %$task_id, $($field)*)
    };
}

/// Create a tracing span for an operation against one fleet host.
#[macro_export]
macro_rules! node_span {
    ($operation:expr, $hostname:expr) => {
        tracing::debug_span!(
            "node_operation",
            operation = %$operation,
            hostname = %$hostname,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $hostname:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "node_operation",
            operation = %$operation,
            hostname = %$hostname,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            FleetError::config_with_source(
                format!("Invalid log filter '{}'", config.log_level),
                Box::new(e),
            )
        })?;

    let result = if config.json_logging {
        fmt().json().with_env_filter(filter).with_current_span(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    if result.is_err() {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        api_address = %config.api.bind_address(),
        database_url = %config.database.url,
        workers = config.executor.worker_count,
        data_dir = %config.paths.data_dir.display(),
        base_dn = %config.directory.base_dn,
        rotation_tick_seconds = config.rotation.tick_interval_seconds,
        metrics_enabled = config.observability.enable_metrics,
        "dirfleet configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = job_span!("provision", "task-1");
        let _span = job_span!("provision", "task-1", node_id = 4);
        let _span = node_span!("upload", "ldap1.example.org");
        let _span = node_span!("upload", "ldap1.example.org", path = "/opt/symas");
    }

    #[test]
    fn test_log_config_info() {
        let config = AppConfig::default();
        log_config_info(&config);
    }

    #[test]
    fn test_init_logging_twice_is_ok() {
        let config = ObservabilityConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
