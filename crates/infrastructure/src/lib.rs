pub mod database;
pub mod task_manager;

pub use database::*;
pub use task_manager::TaskManager;
