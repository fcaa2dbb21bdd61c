pub mod entities;
pub mod ports;
pub mod repositories;
pub mod task_error;

pub use entities::*;
pub use ports::*;
pub use repositories::*;
pub use task_error::*;
pub use disttask_errors::{DistTaskError, DistTaskResult};
