//! # Configuration Settings
//!
//! Defines the configuration structure for the dirfleet engine.

use crate::errors::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Read an environment variable and parse it, falling back to `default`.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|s| s.to_lowercase() == "true" || s == "1").unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Record store configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// JSON job/log API configuration
    #[validate(nested)]
    pub api: ApiConfig,

    /// Task executor configuration
    #[validate(nested)]
    pub executor: ExecutorConfig,

    /// Local file locations
    #[validate(nested)]
    pub paths: PathsConfig,

    /// Directory tree layout and protocol settings
    #[validate(nested)]
    pub directory: DirectorySettings,

    /// Replication verifier tuning
    #[validate(nested)]
    pub verifier: VerifierConfig,

    /// Key rotation settings
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Remote shell settings
    #[validate(nested)]
    pub remote: RemoteConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Build the configuration from `DIRFLEET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database: DatabaseConfig::from_env(),
            api: ApiConfig::from_env(),
            executor: ExecutorConfig::from_env(),
            paths: PathsConfig::from_env(),
            directory: DirectorySettings::from_env(),
            verifier: VerifierConfig::from_env(),
            rotation: RotationConfig::from_env(),
            remote: RemoteConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(FleetError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(FleetError::validation_field(
                "Database URL must start with 'sqlite:'",
                "database.url",
            ));
        }

        if self.observability.enable_metrics && self.observability.metrics_port == self.api.port {
            return Err(FleetError::validation("API and metrics ports cannot be the same"));
        }

        if self.rotation.algorithms.is_empty() {
            return Err(FleetError::validation_field(
                "At least one signature algorithm is required",
                "rotation.algorithms",
            ));
        }

        if !self.directory.base_dn.contains('=') {
            return Err(FleetError::validation_field(
                "Base DN must be a distinguished name",
                "directory.base_dn",
            ));
        }

        Ok(())
    }
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/dirfleet.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Whether the URL points at an in-memory database
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_string("DIRFLEET_DATABASE_URL", &defaults.url),
            max_connections: env_or("DIRFLEET_DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("DIRFLEET_DATABASE_MIN_CONNECTIONS", defaults.min_connections),
            connect_timeout_seconds: env_or(
                "DIRFLEET_DATABASE_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            ),
            idle_timeout_seconds: env_or(
                "DIRFLEET_DATABASE_IDLE_TIMEOUT_SECONDS",
                defaults.idle_timeout_seconds,
            ),
            auto_migrate: env_bool("DIRFLEET_DATABASE_AUTO_MIGRATE", defaults.auto_migrate),
        }
    }
}

/// JSON job/log API configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8088 }
    }
}

impl ApiConfig {
    /// Get the API bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("DIRFLEET_API_HOST", &defaults.host),
            port: env_or("DIRFLEET_API_PORT", defaults.port),
        }
    }
}

/// Task executor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExecutorConfig {
    /// Number of worker tasks pulling from the job queue
    #[validate(range(min = 1, max = 64, message = "Worker count must be between 1 and 64"))]
    pub worker_count: usize,

    /// Bounded queue capacity for pending jobs
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub queue_capacity: usize,

    /// Seconds a finished task stays queryable before its record and log are dropped
    #[validate(range(min = 1, message = "Task retention must be at least 1 second"))]
    pub retention_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { worker_count: num_cpus::get().clamp(1, 8), queue_capacity: 256, retention_secs: 3_600 }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_count: env_or("DIRFLEET_EXECUTOR_WORKERS", defaults.worker_count),
            queue_capacity: env_or("DIRFLEET_EXECUTOR_QUEUE_CAPACITY", defaults.queue_capacity),
            retention_secs: env_or("DIRFLEET_EXECUTOR_RETENTION_SECS", defaults.retention_secs),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Local file locations used by the provisioner and rotation engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PathsConfig {
    /// Base data directory
    pub data_dir: PathBuf,

    /// Operator-supplied custom schema files
    pub schema_dir: PathBuf,

    /// Schema files shipped with the engine
    pub builtin_schema_dir: PathBuf,

    /// Rendered `slapd.conf` files, one per node (`<id>_slapd.conf`)
    pub slapdconf_dir: PathBuf,

    /// Initial LDIF exports, one per provider (`<id>_init.ldif`)
    pub ldif_dir: PathBuf,

    /// Certificate storage (`<hostname>.crt`)
    pub certs_dir: PathBuf,

    /// Directory holding `keygen.jar`
    pub javalibs_dir: PathBuf,

    /// Output path of the locally generated keystore
    pub keystore_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
        Self::rooted_at(home.join(".dirfleet"))
    }
}

impl PathsConfig {
    /// Lay out every path under one data directory
    pub fn rooted_at(data_dir: PathBuf) -> Self {
        Self {
            schema_dir: data_dir.join("schema"),
            builtin_schema_dir: data_dir.join("builtin_schema"),
            slapdconf_dir: data_dir.join("slapdconf"),
            ldif_dir: data_dir.join("ldif"),
            certs_dir: data_dir.join("certs"),
            javalibs_dir: data_dir.join("javalibs"),
            keystore_path: data_dir.join("oxauth-keys.jks"),
            data_dir,
        }
    }

    /// Rendered configuration file for a node
    pub fn slapd_conf_for(&self, node_id: i64) -> PathBuf {
        self.slapdconf_dir.join(format!("{}_slapd.conf", node_id))
    }

    /// Initial LDIF export for a provider
    pub fn init_ldif_for(&self, node_id: i64) -> PathBuf {
        self.ldif_dir.join(format!("{}_init.ldif", node_id))
    }

    /// Stored certificate for a host
    pub fn cert_for(&self, hostname: &str) -> PathBuf {
        self.certs_dir.join(format!("{}.crt", hostname))
    }

    pub fn from_env() -> Self {
        let mut paths = match std::env::var("DIRFLEET_DATA_DIR") {
            Ok(dir) => Self::rooted_at(PathBuf::from(dir)),
            Err(_) => Self::default(),
        };
        let overrides: [(&str, &mut PathBuf); 7] = [
            ("DIRFLEET_SCHEMA_DIR", &mut paths.schema_dir),
            ("DIRFLEET_BUILTIN_SCHEMA_DIR", &mut paths.builtin_schema_dir),
            ("DIRFLEET_SLAPDCONF_DIR", &mut paths.slapdconf_dir),
            ("DIRFLEET_LDIF_DIR", &mut paths.ldif_dir),
            ("DIRFLEET_CERTS_DIR", &mut paths.certs_dir),
            ("DIRFLEET_JAVALIBS_DIR", &mut paths.javalibs_dir),
            ("DIRFLEET_KEYSTORE_PATH", &mut paths.keystore_path),
        ];
        for (key, slot) in overrides {
            if let Ok(value) = std::env::var(key) {
                *slot = PathBuf::from(value);
            }
        }
        paths
    }
}

/// Directory tree layout and protocol settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectorySettings {
    /// Suffix of the data tree
    #[validate(length(min = 1, message = "Base DN cannot be empty"))]
    pub base_dn: String,

    /// Administrator bind DN used on every node
    #[validate(length(min = 1, message = "Root DN cannot be empty"))]
    pub root_dn: String,

    /// Administrator DN of the online configuration backend
    #[validate(length(min = 1, message = "Config admin DN cannot be empty"))]
    pub config_admin_dn: String,

    /// Database entry in `cn=config` that carries replication directives
    #[validate(length(min = 1, message = "Mirror database DN cannot be empty"))]
    pub database_dn: String,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Operation timeout must be between 1 and 300"))]
    pub operation_timeout_seconds: u64,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            base_dn: "o=gluu".to_string(),
            root_dn: "cn=directory manager,o=gluu".to_string(),
            config_admin_dn: "cn=admin,cn=config".to_string(),
            database_dn: "olcDatabase={1}mdb,cn=config".to_string(),
            operation_timeout_seconds: 30,
        }
    }
}

impl DirectorySettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_dn: env_string("DIRFLEET_BASE_DN", &defaults.base_dn),
            root_dn: env_string("DIRFLEET_ROOT_DN", &defaults.root_dn),
            config_admin_dn: env_string("DIRFLEET_CONFIG_ADMIN_DN", &defaults.config_admin_dn),
            database_dn: env_string("DIRFLEET_DATABASE_DN", &defaults.database_dn),
            operation_timeout_seconds: env_or(
                "DIRFLEET_DIRECTORY_TIMEOUT_SECONDS",
                defaults.operation_timeout_seconds,
            ),
        }
    }
}

/// Replication verifier tuning
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifierConfig {
    /// Compare attempts per consumer before declaring failure
    #[validate(range(min = 1, max = 100, message = "Attempts must be between 1 and 100"))]
    pub attempts: u32,

    /// Fixed delay between attempts, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self { attempts: 5, retry_delay_ms: 3_000 }
    }
}

impl VerifierConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            attempts: env_or("DIRFLEET_VERIFY_ATTEMPTS", defaults.attempts),
            retry_delay_ms: env_or("DIRFLEET_VERIFY_RETRY_DELAY_MS", defaults.retry_delay_ms),
        }
    }
}

/// Key rotation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RotationConfig {
    /// Scheduler tick interval in seconds
    #[validate(range(min = 1, message = "Tick interval must be at least 1 second"))]
    pub tick_interval_seconds: u64,

    /// Signing-service request timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Request timeout must be between 1 and 300"))]
    pub request_timeout_seconds: u64,

    /// Validity of generated keys, in days
    #[validate(range(min = 1, message = "Key validity must be at least one day"))]
    pub key_validity_days: u32,

    /// Signature algorithms requested on every rotation
    pub algorithms: Vec<String>,

    /// Enable the periodic rotation check
    pub scheduler_enabled: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            request_timeout_seconds: 30,
            key_validity_days: 365,
            algorithms: ["RS256", "RS384", "RS512", "ES256", "ES384", "ES512"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            scheduler_enabled: true,
        }
    }
}

impl RotationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let algorithms = std::env::var("DIRFLEET_ROTATION_ALGORITHMS")
            .map(|s| {
                s.split(',').map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect()
            })
            .unwrap_or(defaults.algorithms);
        Self {
            tick_interval_seconds: env_or(
                "DIRFLEET_ROTATION_TICK_SECONDS",
                defaults.tick_interval_seconds,
            ),
            request_timeout_seconds: env_or(
                "DIRFLEET_SIGNING_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            key_validity_days: env_or("DIRFLEET_KEY_VALIDITY_DAYS", defaults.key_validity_days),
            algorithms,
            scheduler_enabled: env_bool("DIRFLEET_SCHEDULER_ENABLED", defaults.scheduler_enabled),
        }
    }
}

/// Remote shell settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemoteConfig {
    /// Login user on every managed host
    #[validate(length(min = 1, message = "SSH user cannot be empty"))]
    pub user: String,

    /// `ssh` binary
    #[validate(length(min = 1, message = "ssh binary cannot be empty"))]
    pub ssh_binary: String,

    /// `scp` binary
    #[validate(length(min = 1, message = "scp binary cannot be empty"))]
    pub scp_binary: String,

    /// Connect timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Command timeout must be between 1 and 300"))]
    pub connect_timeout_seconds: u64,

    /// Known-hosts file that new host keys are appended to
    pub known_hosts_file: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            ssh_binary: "ssh".to_string(),
            scp_binary: "scp".to_string(),
            connect_timeout_seconds: 10,
            known_hosts_file: None,
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user: env_string("DIRFLEET_SSH_USER", &defaults.user),
            ssh_binary: env_string("DIRFLEET_SSH_BINARY", &defaults.ssh_binary),
            scp_binary: env_string("DIRFLEET_SCP_BINARY", &defaults.scp_binary),
            connect_timeout_seconds: env_or(
                "DIRFLEET_SSH_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            ),
            known_hosts_file: std::env::var("DIRFLEET_SSH_KNOWN_HOSTS").ok().map(PathBuf::from),
        }
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable the Prometheus exporter
    pub enable_metrics: bool,

    /// Metrics listener port (0 = disabled)
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if !self.enable_metrics || self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env_string("DIRFLEET_LOG_LEVEL", &defaults.log_level),
            json_logging: env_bool("DIRFLEET_JSON_LOGGING", defaults.json_logging),
            enable_metrics: env_bool("DIRFLEET_ENABLE_METRICS", defaults.enable_metrics),
            metrics_port: env_or("DIRFLEET_METRICS_PORT", defaults.metrics_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_config_timeouts() {
        let config = DatabaseConfig {
            connect_timeout_seconds: 15,
            idle_timeout_seconds: 300,
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));

        let config_no_idle = DatabaseConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert_eq!(config_no_idle.idle_timeout(), None);
    }

    #[test]
    fn test_paths_layout() {
        let paths = PathsConfig::rooted_at(PathBuf::from("/srv/fleet"));
        assert_eq!(paths.slapd_conf_for(3), PathBuf::from("/srv/fleet/slapdconf/3_slapd.conf"));
        assert_eq!(paths.init_ldif_for(1), PathBuf::from("/srv/fleet/ldif/1_init.ldif"));
        assert_eq!(paths.cert_for("ldap1"), PathBuf::from("/srv/fleet/certs/ldap1.crt"));
    }

    #[test]
    fn test_verifier_defaults() {
        let verifier = VerifierConfig::default();
        assert_eq!(verifier.attempts, 5);
        assert_eq!(verifier.retry_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_rotation_defaults() {
        let rotation = RotationConfig::default();
        assert_eq!(rotation.algorithms.len(), 6);
        assert_eq!(rotation.tick_interval(), Duration::from_secs(30));
        assert_eq!(rotation.key_validity_days, 365);
    }

    #[test]
    fn test_metrics_address() {
        let enabled = ObservabilityConfig { enable_metrics: true, ..Default::default() };
        assert_eq!(enabled.metrics_bind_address(), Some("0.0.0.0:9090".to_string()));
        assert_eq!(ObservabilityConfig::default().metrics_bind_address(), None);
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = AppConfig::default();
        config.database.url = "postgresql://localhost/fleet".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.enable_metrics = true;
        config.observability.metrics_port = config.api.port;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rotation.algorithms.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.verifier.attempts = 0;
        assert!(config.validate().is_err());
    }
}
