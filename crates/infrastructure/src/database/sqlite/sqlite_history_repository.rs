use std::sync::Arc;

use async_trait::async_trait;
use disttask_core::StorageConfig;
use disttask_domain::{entities::Task, ports::Clock, repositories::HistoryRepository};
use disttask_errors::DistTaskResult;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument};

use super::push_in_list;
use crate::database::mapping::{SUBTASK_COLUMNS, TASK_COLUMNS};

pub struct SqliteHistoryRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    keep_seconds: i64,
}

impl SqliteHistoryRepository {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, storage: &StorageConfig) -> Self {
        Self {
            pool,
            clock,
            keep_seconds: i64::try_from(storage.subtask_history_keep_seconds).unwrap_or(i64::MAX),
        }
    }
}

/// 复制到历史表后从活动表删除，返回搬移的行数
pub(crate) async fn move_subtasks_to_history(
    conn: &mut SqliteConnection,
    task_id: i64,
) -> DistTaskResult<u64> {
    sqlx::query(&format!(
        "INSERT INTO dist_subtask_history ({SUBTASK_COLUMNS}, end_time) \
         SELECT {SUBTASK_COLUMNS}, end_time FROM dist_subtasks WHERE task_id = $1"
    ))
    .bind(task_id)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query("DELETE FROM dist_subtasks WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl HistoryRepository for SqliteHistoryRepository {
    #[instrument(skip(self, tasks), fields(task_count = tasks.len()))]
    async fn transfer_tasks_to_history(&self, tasks: &[Task]) -> DistTaskResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let now = self.clock.now().timestamp();
        let mut tx = self.pool.begin().await?;

        for task in tasks {
            sqlx::query("UPDATE dist_tasks SET meta = $1, state_update_time = $2 WHERE id = $3")
                .bind(&task.meta)
                .bind(now)
                .bind(task.id)
                .execute(&mut *tx)
                .await?;
        }

        let ids = tasks.iter().map(|task| task.id);

        let mut insert = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO dist_task_history ({TASK_COLUMNS}) SELECT {TASK_COLUMNS} FROM dist_tasks WHERE id"
        ));
        push_in_list(&mut insert, ids.clone());
        insert.build().execute(&mut *tx).await?;

        let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM dist_tasks WHERE id");
        push_in_list(&mut delete, ids);
        delete.build().execute(&mut *tx).await?;

        let mut moved_subtasks = 0;
        for task in tasks {
            moved_subtasks += move_subtasks_to_history(&mut tx, task.id).await?;
        }

        tx.commit().await?;

        info!(
            "任务转入历史表: {} 个任务, {} 个子任务",
            tasks.len(),
            moved_subtasks
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transfer_subtasks_to_history(&self, task_id: i64) -> DistTaskResult<()> {
        let mut tx = self.pool.begin().await?;
        let moved = move_subtasks_to_history(&mut tx, task_id).await?;
        tx.commit().await?;

        debug!("子任务转入历史表: task_id={}, {} 个", task_id, moved);
        Ok(())
    }

    async fn gc_subtasks(&self) -> DistTaskResult<u64> {
        let cutoff = self.clock.now().timestamp().saturating_sub(self.keep_seconds);
        let result = sqlx::query("DELETE FROM dist_subtask_history WHERE state_update_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("清理过期历史子任务 {} 个", deleted);
        }
        Ok(deleted)
    }
}
