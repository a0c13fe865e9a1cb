//! Integration tests for environment-driven configuration

use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use dirfleet::config::AppConfig;
use dirfleet::FleetError;

// Tests in this file mutate process environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const VARS: [&str; 10] = [
    "DIRFLEET_DATABASE_URL",
    "DIRFLEET_API_PORT",
    "DIRFLEET_METRICS_PORT",
    "DIRFLEET_ENABLE_METRICS",
    "DIRFLEET_DATA_DIR",
    "DIRFLEET_LDIF_DIR",
    "DIRFLEET_ROTATION_ALGORITHMS",
    "DIRFLEET_VERIFY_ATTEMPTS",
    "DIRFLEET_BASE_DN",
    "DIRFLEET_EXECUTOR_RETENTION_SECS",
];

fn clear() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
fn defaults_are_valid() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
    clear();

    let config = AppConfig::from_env().unwrap();
    assert!(config.database.url.starts_with("sqlite:"));
    assert_eq!(config.api.bind_address(), "127.0.0.1:8088");
    assert_eq!(config.directory.base_dn, "o=gluu");
    assert_eq!(config.directory.root_dn, "cn=directory manager,o=gluu");
    assert_eq!(config.verifier.attempts, 5);
    assert_eq!(config.verifier.retry_delay_ms, 3_000);
    assert_eq!(config.rotation.key_validity_days, 365);
    assert_eq!(config.rotation.tick_interval().as_secs(), 30);
    assert_eq!(config.remote.user, "root");
    assert_eq!(config.executor.retention().as_secs(), 3_600);
}

#[test]
fn environment_overrides_are_applied() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
    clear();
    env::set_var("DIRFLEET_DATABASE_URL", "sqlite::memory:");
    env::set_var("DIRFLEET_API_PORT", "18088");
    env::set_var("DIRFLEET_DATA_DIR", "/var/lib/dirfleet");
    env::set_var("DIRFLEET_LDIF_DIR", "/srv/ldif");
    env::set_var("DIRFLEET_ROTATION_ALGORITHMS", "RS256, ES256,");
    env::set_var("DIRFLEET_VERIFY_ATTEMPTS", "2");
    env::set_var("DIRFLEET_EXECUTOR_RETENTION_SECS", "120");

    let config = AppConfig::from_env();
    clear();
    let config = config.unwrap();

    assert!(config.database.is_memory());
    assert_eq!(config.api.port, 18088);
    assert_eq!(config.paths.certs_dir, PathBuf::from("/var/lib/dirfleet/certs"));
    assert_eq!(config.paths.init_ldif_for(7), PathBuf::from("/srv/ldif/7_init.ldif"));
    assert_eq!(config.paths.slapd_conf_for(7), PathBuf::from("/var/lib/dirfleet/slapdconf/7_slapd.conf"));
    assert_eq!(config.rotation.algorithms, vec!["RS256".to_string(), "ES256".to_string()]);
    assert_eq!(config.verifier.attempts, 2);
    assert_eq!(config.executor.retention_secs, 120);
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());

    clear();
    env::set_var("DIRFLEET_DATABASE_URL", "postgres://localhost/dirfleet");
    let err = AppConfig::from_env().unwrap_err();
    assert!(matches!(err, FleetError::Validation { .. }));

    clear();
    env::set_var("DIRFLEET_ENABLE_METRICS", "true");
    env::set_var("DIRFLEET_METRICS_PORT", "8088");
    env::set_var("DIRFLEET_API_PORT", "8088");
    let err = AppConfig::from_env().unwrap_err();
    assert!(matches!(err, FleetError::Validation { .. }));

    clear();
    env::set_var("DIRFLEET_BASE_DN", "gluu");
    let err = AppConfig::from_env().unwrap_err();
    assert!(matches!(err, FleetError::Validation { .. }));

    clear();
    env::set_var("DIRFLEET_ROTATION_ALGORITHMS", " , ");
    let result = AppConfig::from_env();
    clear();
    assert!(matches!(result.unwrap_err(), FleetError::Validation { .. }));
}
