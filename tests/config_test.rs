//! Layered configuration: defaults, TOML file, environment.

use serial_test::serial;
use std::io::Write;
use taurus_core::basetypes::{ManagerState, SerializationMode};
use taurus_core::config::TaurusConfig;
use taurus_core::{TaurusError, TaurusManager};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let config = TaurusConfig::load_from("/nonexistent/taurus.toml").unwrap();
    assert_eq!(config, TaurusConfig::default());
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    let file = write_config(
        r#"
default_scheme = "sim"
serialization_mode = "serial"

[thread_pool]
workers = 2

[polling]
default_period_ms = 250

[logging]
level = "debug"
max_deprecations_logged = 3
"#,
    );
    let config = TaurusConfig::load_from(file.path()).unwrap();
    assert_eq!(config.serialization_mode, SerializationMode::Serial);
    assert_eq!(config.thread_pool.workers, 2);
    assert_eq!(config.thread_pool.queue_size, 1000);
    assert_eq!(config.polling.default_period_ms, 250);
    assert!(config.polling.enabled);
    assert_eq!(config.logging.max_deprecations_logged, Some(3));
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config("[polling]\ndefault_period_ms = 250\n");
    std::env::set_var("TAURUS_POLLING__DEFAULT_PERIOD_MS", "125");
    std::env::set_var("TAURUS_SIM__CASE_SENSITIVE", "true");
    let config = TaurusConfig::load_from(file.path());
    std::env::remove_var("TAURUS_POLLING__DEFAULT_PERIOD_MS");
    std::env::remove_var("TAURUS_SIM__CASE_SENSITIVE");

    let config = config.unwrap();
    assert_eq!(config.polling.default_period_ms, 125);
    assert!(config.sim.case_sensitive);
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let file = write_config("[thread_pool]\nworkers = \"many\"\n");
    assert!(TaurusConfig::load_from(file.path()).is_err());
}

#[test]
fn test_manager_rejects_invalid_config() {
    let mut config = TaurusConfig::default();
    config.thread_pool.workers = 0;
    let err = TaurusManager::new(config).err().unwrap();
    assert!(matches!(err, TaurusError::Configuration(_)));
    assert!(err.to_string().contains("workers"));

    let mut config = TaurusConfig::default();
    config.sim.default_authority = "localhost:10000".to_string();
    assert!(TaurusManager::new(config).is_err());
}

#[test]
fn test_manager_applies_config() {
    let mut config = TaurusConfig::default();
    config.serialization_mode = SerializationMode::Serial;
    config.polling.default_period_ms = 750;
    let manager = TaurusManager::new(config).unwrap();

    assert_eq!(manager.state(), ManagerState::Inited);
    assert_eq!(manager.serialization_mode(), SerializationMode::Serial);
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    assert_eq!(attr.polling_period(), 750);

    manager.change_default_polling_period(1500).unwrap();
    let other = manager.get_attribute("a/b/c/counter").unwrap();
    assert_eq!(other.polling_period(), 1500);
    assert!(manager.change_default_polling_period(0).is_err());
}

#[test]
fn test_case_sensitive_names() {
    let mut config = TaurusConfig::default();
    config.serialization_mode = SerializationMode::Serial;
    config.sim.case_sensitive = true;
    let manager = TaurusManager::new(config).unwrap();
    let factory = manager.get_default_factory().unwrap();
    assert!(factory.is_case_sensitive());

    let lower = manager.get_device("a/b/c").unwrap();
    let upper = manager.get_device("A/B/C").unwrap();
    assert!(!std::sync::Arc::ptr_eq(&lower, &upper));
}
