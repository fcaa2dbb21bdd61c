pub mod config;

pub use config::models::{AppConfig, DatabaseConfig, LoggingConfig, StorageConfig};
