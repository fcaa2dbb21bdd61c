use crate::config::models::{AppConfig, DatabaseConfig, LoggingConfig, StorageConfig};

#[test]
fn test_database_validation() {
    let mut config = DatabaseConfig::default();
    assert!(config.validate().is_ok());

    // Test empty URL
    config.url = "".to_string();
    assert!(config.validate().is_err());

    // Test invalid URL format
    config.url = "postgresql://localhost/test".to_string();
    assert!(config.validate().is_err());

    config.url = "sqlite::memory:".to_string();
    assert!(config.validate().is_ok());

    // Test connection count config
    config.max_connections = 0;
    assert!(config.validate().is_err());

    config.max_connections = 10;
    config.min_connections = 15;
    assert!(config.validate().is_err());
}

#[test]
fn test_in_memory_database_uses_single_connection() {
    let config = DatabaseConfig::in_memory();
    assert_eq!(config.max_connections, 1);
    assert!(config.validate().is_ok());
}

#[test]
fn test_storage_defaults() {
    let config = StorageConfig::default();
    assert_eq!(config.subtask_history_keep_seconds, 14 * 24 * 60 * 60);
    assert_eq!(config.subtask_batch_size_limit(), 16 * 1024 * 1024);
    assert_eq!(config.top_unfinished_task_limit(), 32);
    assert!(config.effective_cpu_count() >= 1);
    assert!(config.validate().is_ok());
}

#[test]
fn test_storage_batch_limit_takes_smaller_value() {
    let config = StorageConfig {
        txn_total_size_limit: 1024,
        ..StorageConfig::default()
    };
    assert_eq!(config.subtask_batch_size_limit(), 1024);
}

#[test]
fn test_storage_validation() {
    let mut config = StorageConfig::default();

    config.subtask_history_keep_seconds = 0;
    assert!(config.validate().is_err());

    config.subtask_history_keep_seconds = 60;
    config.cpu_count = Some(-1);
    assert!(config.validate().is_err());

    config.cpu_count = Some(8);
    assert!(config.validate().is_ok());
    assert_eq!(config.effective_cpu_count(), 8);
}

#[test]
fn test_logging_validation() {
    let mut config = LoggingConfig::default();
    assert!(config.validate().is_ok());

    config.format = "xml".to_string();
    assert!(config.validate().is_err());

    config.format = "pretty".to_string();
    config.level = "".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_app_config_default_is_valid() {
    assert!(AppConfig::default().validate().is_ok());
}
