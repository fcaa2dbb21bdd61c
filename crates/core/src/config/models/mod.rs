pub mod app_config;
pub mod database;
pub mod logging;
pub mod storage;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use logging::LoggingConfig;
pub use storage::{StorageConfig, DEFAULT_SUBTASK_KEEP_DAYS};
