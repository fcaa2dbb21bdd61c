//! 任务步骤切换
//!
//! 调度器推进任务时需要同时修改任务行并写入下一步骤的子任务。多个调度器可能
//! 基于同一份任务快照发起切换，任务行上的条件更新决定谁胜出：受影响行数为 0
//! 说明任务已被别人推进，此时不再写入任何子任务。

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use disttask_core::StorageConfig;
use disttask_domain::{
    entities::{Step, Subtask, SubtaskState, Task, TaskState},
    ports::Clock,
    repositories::StepTransition,
    task_error::serialize_err,
};
use disttask_errors::{DistTaskError, DistTaskResult};
use sqlx::{Connection, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};

/// 单条 INSERT 语句最多携带的子任务行数
const MAX_ROWS_PER_INSERT: usize = 1000;

pub struct SqliteStepTransition {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    batch_size_limit: u64,
}

impl SqliteStepTransition {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, storage: &StorageConfig) -> Self {
        Self {
            pool,
            clock,
            batch_size_limit: storage.subtask_batch_size_limit(),
        }
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    async fn update_task_and_add_subtasks_inner(
        &self,
        task: &Task,
        subtasks: &[Subtask],
        prev_state: TaskState,
        retryable: &mut bool,
    ) -> DistTaskResult<()> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE dist_tasks
            SET state = $1, scheduler_id = $2, step = $3, concurrency = $4, meta = $5,
                error = $6, state_update_time = $7
            WHERE id = $8 AND state = $9
            "#,
        )
        .bind(task.state)
        .bind(&task.scheduler_id)
        .bind(task.step.value())
        .bind(task.concurrency)
        .bind(&task.meta)
        .bind(serialize_err(task.error.as_ref()))
        .bind(now)
        .bind(task.id)
        .bind(prev_state)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let still_there = sqlx::query("SELECT id FROM dist_tasks WHERE id = $1 AND state = $2")
                .bind(task.id)
                .bind(prev_state)
                .fetch_optional(&mut *tx)
                .await?;
            if still_there.is_none() {
                *retryable = false;
                warn!("任务状态已被修改, 放弃本次更新: {}", task.entity_description());
                return Err(DistTaskError::InvalidStateTransform { task_id: task.id });
            }
        }

        if !subtasks.is_empty() {
            let state = if task.state == TaskState::Reverting {
                SubtaskState::RevertPending
            } else {
                SubtaskState::Pending
            };
            let owned: Vec<Subtask> = subtasks
                .iter()
                .map(|subtask| Subtask {
                    task_id: task.id,
                    ..subtask.clone()
                })
                .collect();
            insert_subtasks(&mut tx, &owned, state, now).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// 仅当任务仍处于快照中的 (state, step) 时才更新，返回受影响行数
pub(crate) async fn update_task_state_step(
    conn: &mut SqliteConnection,
    task: &Task,
    next_state: TaskState,
    next_step: Step,
    now: i64,
) -> DistTaskResult<u64> {
    let start_time = if task.state == TaskState::Pending {
        "start_time = $3, "
    } else {
        ""
    };
    let sql = format!(
        "UPDATE dist_tasks SET state = $1, step = $2, {start_time}state_update_time = $3, meta = $4 \
         WHERE id = $5 AND state = $6 AND step = $7"
    );

    let result = sqlx::query(&sql)
        .bind(next_state)
        .bind(next_step.value())
        .bind(now)
        .bind(&task.meta)
        .bind(task.id)
        .bind(task.state)
        .bind(task.step.value())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// 以 `state` 批量写入子任务，创建时间与状态更新时间都取 `now`
pub(crate) async fn insert_subtasks(
    conn: &mut SqliteConnection,
    subtasks: &[Subtask],
    state: SubtaskState,
    now: i64,
) -> DistTaskResult<()> {
    for chunk in subtasks.chunks(MAX_ROWS_PER_INSERT) {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "INSERT INTO dist_subtasks \
             (step, task_id, exec_id, meta, state, type, concurrency, ordinal, create_time, state_update_time, summary) ",
        );
        builder.push_values(chunk, |mut row, subtask| {
            row.push_bind(subtask.step.value())
                .push_bind(subtask.task_id)
                .push_bind(subtask.exec_id.as_str())
                .push_bind(subtask.meta.as_slice())
                .push_bind(state)
                .push_bind(subtask.task_type.to_code())
                .push_bind(subtask.concurrency)
                .push_bind(subtask.ordinal)
                .push_bind(now)
                .push_bind(now)
                .push_bind("{}");
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// 按 meta 总大小切分子任务，每批不超过 `limit` 字节；单个超限的子任务独占一批
pub(crate) fn split_subtasks(subtasks: &[Subtask], limit: u64) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut size = 0u64;
    for (idx, subtask) in subtasks.iter().enumerate() {
        let meta_len = subtask.meta.len() as u64;
        if idx > start && size + meta_len > limit {
            batches.push(start..idx);
            start = idx;
            size = 0;
        }
        size += meta_len;
    }
    if start < subtasks.len() {
        batches.push(start..subtasks.len());
    }
    batches
}

#[async_trait]
impl StepTransition for SqliteStepTransition {
    #[instrument(skip(self, task, subtasks), fields(task_id = task.id, subtask_count = subtasks.len()))]
    async fn switch_task_step(
        &self,
        task: &Task,
        next_state: TaskState,
        next_step: Step,
        subtasks: &[Subtask],
    ) -> DistTaskResult<()> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let affected = update_task_state_step(&mut tx, task, next_state, next_step, now).await?;
        if affected == 0 {
            tx.commit().await?;
            info!(
                "任务已被其他调度器推进, 跳过步骤切换: {} -> {}",
                task.entity_description(),
                next_step
            );
            return Ok(());
        }

        insert_subtasks(&mut tx, subtasks, SubtaskState::Pending, now).await?;
        tx.commit().await?;

        info!(
            "任务步骤切换成功: task_id={}, {} -> {}, 子任务 {} 个",
            task.id,
            task.step,
            next_step,
            subtasks.len()
        );
        Ok(())
    }

    #[instrument(skip(self, task, subtasks), fields(task_id = task.id, subtask_count = subtasks.len()))]
    async fn switch_task_step_in_batch(
        &self,
        task: &Task,
        next_state: TaskState,
        next_step: Step,
        subtasks: &[Subtask],
    ) -> DistTaskResult<()> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM dist_subtasks WHERE task_id = $1 AND step = $2")
            .bind(task.id)
            .bind(next_step.value())
            .fetch_one(&mut *conn)
            .await?;
        let existing = row.try_get::<i64, _>("cnt")? as usize;
        if existing > subtasks.len() {
            return Err(DistTaskError::UnstableSubtasks {
                expected: subtasks.len(),
                actual: existing,
            });
        }
        if existing > 0 {
            info!("已存在 {} 个下一步骤的子任务, 从断点继续写入", existing);
        }

        let remaining = &subtasks[existing..];
        let batches = split_subtasks(remaining, self.batch_size_limit);
        for range in &batches {
            let now = self.now();
            let mut tx = conn.begin().await?;
            insert_subtasks(&mut tx, &remaining[range.clone()], SubtaskState::Pending, now).await?;
            tx.commit().await?;
            debug!("写入子任务批次: {:?}", range);
        }

        let affected =
            update_task_state_step(&mut conn, task, next_state, next_step, self.now()).await?;
        if affected == 0 {
            debug!("任务行未变化, 可能已被其他调度器推进: {}", task.id);
        }

        info!(
            "任务分批步骤切换完成: task_id={}, {} -> {}, 批次 {} 个",
            task.id,
            task.step,
            next_step,
            batches.len()
        );
        Ok(())
    }

    async fn update_task_and_add_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
        prev_state: TaskState,
    ) -> (bool, DistTaskResult<()>) {
        let mut retryable = true;
        let result = self
            .update_task_and_add_subtasks_inner(task, subtasks, prev_state, &mut retryable)
            .await;
        (retryable, result)
    }
}
