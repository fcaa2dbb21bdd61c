use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use disttask_core::StorageConfig;
use disttask_domain::{
    entities::{Step, SubtaskState, Task, TaskState, TaskType, NORMAL_PRIORITY},
    ports::Clock,
    repositories::TaskRepository,
};
use disttask_errors::{DistTaskError, DistTaskResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};

use super::push_in_list;
use super::sqlite_node_repository::cpu_count_of_managed_node;
use crate::database::mapping::{row_to_task, row_to_task_basic, BASIC_TASK_COLUMNS, TASK_COLUMNS};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    top_unfinished_limit: i64,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, storage: &StorageConfig) -> Self {
        Self {
            pool,
            clock,
            top_unfinished_limit: storage.top_unfinished_task_limit(),
        }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, meta), fields(meta_len = meta.len()))]
    async fn create_task(
        &self,
        key: &str,
        task_type: TaskType,
        concurrency: i64,
        meta: &[u8],
    ) -> DistTaskResult<i64> {
        let mut conn = self.pool.acquire().await?;

        let cpu_count = cpu_count_of_managed_node(&mut conn).await?;
        if concurrency > cpu_count {
            return Err(DistTaskError::ConcurrencyExceedsCapacity {
                concurrency,
                cpu_count,
            });
        }

        let result = sqlx::query(
            r#"
            INSERT INTO dist_tasks (task_key, type, state, priority, concurrency, step, meta, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(key)
        .bind(task_type)
        .bind(TaskState::Pending)
        .bind(NORMAL_PRIORITY)
        .bind(concurrency)
        .bind(Step::INIT.value())
        .bind(meta)
        .bind(self.clock.now().timestamp())
        .execute(&mut *conn)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(DistTaskError::task_already_exists(key));
            }
            Err(e) => return Err(DistTaskError::Database(e)),
        };

        let task_id = result.last_insert_rowid();
        info!("创建任务成功: {} (ID: {})", key, task_id);
        Ok(task_id)
    }

    async fn get_one_task(&self) -> DistTaskResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dist_tasks WHERE state = $1 LIMIT 1"
        ))
        .bind(TaskState::Pending)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn get_top_unfinished_tasks(&self) -> DistTaskResult<Vec<Task>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {BASIC_TASK_COLUMNS} FROM dist_tasks WHERE state"
        ));
        push_in_list(&mut builder, TaskState::UNFINISHED);
        builder.push(" ORDER BY priority ASC, create_time ASC, id ASC LIMIT ");
        builder.push_bind(self.top_unfinished_limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task_basic).collect()
    }

    async fn get_tasks_in_states(&self, states: &[TaskState]) -> DistTaskResult<Vec<Task>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM dist_tasks WHERE state"));
        push_in_list(&mut builder, states.iter().copied());
        builder.push(" ORDER BY priority ASC, create_time ASC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn get_tasks_from_history_in_states(
        &self,
        states: &[TaskState],
    ) -> DistTaskResult<Vec<Task>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TASK_COLUMNS} FROM dist_task_history WHERE state"
        ));
        push_in_list(&mut builder, states.iter().copied());
        builder.push(" ORDER BY priority ASC, create_time ASC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn get_task_by_id(&self, task_id: i64) -> DistTaskResult<Task> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM dist_tasks WHERE id = $1"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_task(&row),
            None => Err(DistTaskError::task_not_found(task_id)),
        }
    }

    async fn get_task_by_id_with_history(&self, task_id: i64) -> DistTaskResult<Task> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dist_tasks WHERE id = $1 \
             UNION SELECT {TASK_COLUMNS} FROM dist_task_history WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        match rows.first() {
            Some(row) => row_to_task(row),
            None => Err(DistTaskError::task_not_found(task_id)),
        }
    }

    async fn get_task_by_key(&self, key: &str) -> DistTaskResult<Task> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dist_tasks WHERE task_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_task(&row),
            None => Err(DistTaskError::task_key_not_found(key)),
        }
    }

    async fn get_task_by_key_with_history(&self, key: &str) -> DistTaskResult<Task> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM dist_tasks WHERE task_key = $1 \
             UNION SELECT {TASK_COLUMNS} FROM dist_task_history WHERE task_key = $1"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        match rows.first() {
            Some(row) => row_to_task(row),
            None => Err(DistTaskError::task_key_not_found(key)),
        }
    }

    /// 同一节点上同一任务的多个子任务只占用其中最大的并发度
    async fn get_used_slots_on_nodes(&self) -> DistTaskResult<HashMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT exec_id, SUM(max_concurrency) AS used_slots
            FROM (
                SELECT exec_id, task_id, MAX(concurrency) AS max_concurrency
                FROM dist_subtasks
                WHERE state IN ($1, $2)
                GROUP BY exec_id, task_id
            ) AS slots
            GROUP BY exec_id
            "#,
        )
        .bind(SubtaskState::Pending)
        .bind(SubtaskState::Running)
        .fetch_all(&self.pool)
        .await?;

        let mut slots = HashMap::with_capacity(rows.len());
        for row in rows {
            let exec_id: String = row.try_get("exec_id")?;
            let used: i64 = row.try_get("used_slots")?;
            slots.insert(exec_id, used);
        }

        debug!("统计节点已用槽位: {} 个节点", slots.len());
        Ok(slots)
    }

    async fn is_task_cancelling(&self, task_id: i64) -> DistTaskResult<bool> {
        let row = sqlx::query("SELECT 1 FROM dist_tasks WHERE id = $1 AND state = $2")
            .bind(task_id)
            .bind(TaskState::Cancelling)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }
}
