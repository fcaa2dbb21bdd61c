pub mod manager;
pub mod mapping;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use sqlite::{
    DbPool, SqliteHistoryRepository, SqliteNodeRepository, SqliteStepTransition,
    SqliteSubtaskRepository, SqliteTaskRepository,
};
