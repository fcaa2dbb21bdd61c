pub mod sqlite_history_repository;
pub mod sqlite_node_repository;
pub mod sqlite_step_transition;
pub mod sqlite_subtask_repository;
pub mod sqlite_task_repository;

pub use sqlite_history_repository::SqliteHistoryRepository;
pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_step_transition::SqliteStepTransition;
pub use sqlite_subtask_repository::SqliteSubtaskRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use sqlx::{Pool, QueryBuilder, Sqlite};

pub type DbPool = Pool<Sqlite>;

/// 追加 ` IN (?, ?, ...)`，调用方保证 `values` 非空
pub(crate) fn push_in_list<'args, T>(
    builder: &mut QueryBuilder<'args, Sqlite>,
    values: impl IntoIterator<Item = T>,
) where
    T: 'args + sqlx::Encode<'args, Sqlite> + sqlx::Type<Sqlite>,
{
    builder.push(" IN (");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}
