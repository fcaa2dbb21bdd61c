use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use disttask_domain::{
    entities::{Step, Subtask, SubtaskState},
    ports::Clock,
    repositories::SubtaskRepository,
    task_error::{deserialize_err, serialize_err, TaskError},
};
use disttask_errors::{DistTaskError, DistTaskResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, instrument, warn};

use super::push_in_list;
use crate::database::mapping::{
    row_to_subtask, row_to_subtask_basic, BASIC_SUBTASK_COLUMNS, SUBTASK_COLUMNS,
};

pub struct SqliteSubtaskRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteSubtaskRepository {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    /// 按 (exec_id, task_id, step, state IN ...) 过滤的公共前缀
    fn select_by_step_and_states<'a>(
        columns: &str,
        exec_id: &'a str,
        task_id: i64,
        step: Step,
        states: &'a [SubtaskState],
    ) -> DistTaskResult<QueryBuilder<'a, Sqlite>> {
        if states.is_empty() {
            return Err(DistTaskError::invalid_argument("子任务状态列表不能为空"));
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {columns} FROM dist_subtasks WHERE exec_id = "));
        builder.push_bind(exec_id);
        builder.push(" AND task_id = ");
        builder.push_bind(task_id);
        builder.push(" AND step = ");
        builder.push_bind(step.value());
        builder.push(" AND state");
        push_in_list(&mut builder, states.iter().copied());
        Ok(builder)
    }
}

#[async_trait]
impl SubtaskRepository for SqliteSubtaskRepository {
    async fn get_subtasks_by_step_and_states(
        &self,
        exec_id: &str,
        task_id: i64,
        step: Step,
        states: &[SubtaskState],
    ) -> DistTaskResult<Vec<Subtask>> {
        let mut builder =
            Self::select_by_step_and_states(SUBTASK_COLUMNS, exec_id, task_id, step, states)?;
        builder.push(" ORDER BY id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_subtask).collect()
    }

    async fn get_subtasks_by_exec_ids_and_step_and_state(
        &self,
        exec_ids: &[String],
        task_id: i64,
        step: Step,
        state: SubtaskState,
    ) -> DistTaskResult<Vec<Subtask>> {
        if exec_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SUBTASK_COLUMNS} FROM dist_subtasks WHERE task_id = "
        ));
        builder.push_bind(task_id);
        builder.push(" AND step = ");
        builder.push_bind(step.value());
        builder.push(" AND state = ");
        builder.push_bind(state);
        builder.push(" AND exec_id");
        push_in_list(&mut builder, exec_ids.iter().map(String::as_str));
        builder.push(" ORDER BY id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_subtask).collect()
    }

    async fn get_first_subtask_in_states(
        &self,
        exec_id: &str,
        task_id: i64,
        step: Step,
        states: &[SubtaskState],
    ) -> DistTaskResult<Option<Subtask>> {
        let mut builder =
            Self::select_by_step_and_states(SUBTASK_COLUMNS, exec_id, task_id, step, states)?;
        builder.push(" ORDER BY id LIMIT 1");

        let row = builder.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_subtask).transpose()
    }

    async fn has_subtasks_in_states(
        &self,
        exec_id: &str,
        task_id: i64,
        step: Step,
        states: &[SubtaskState],
    ) -> DistTaskResult<bool> {
        let mut builder =
            Self::select_by_step_and_states("1", exec_id, task_id, step, states)?;
        builder.push(" LIMIT 1");

        let row = builder.build().fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn get_active_subtasks(&self, task_id: i64) -> DistTaskResult<Vec<Subtask>> {
        let rows = sqlx::query(&format!(
            "SELECT {BASIC_SUBTASK_COLUMNS} FROM dist_subtasks \
             WHERE task_id = $1 AND state IN ($2, $3) ORDER BY id"
        ))
        .bind(task_id)
        .bind(SubtaskState::Pending)
        .bind(SubtaskState::Running)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_subtask_basic).collect()
    }

    async fn get_subtasks_by_step_and_state(
        &self,
        task_id: i64,
        step: Step,
        state: SubtaskState,
    ) -> DistTaskResult<Vec<Subtask>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM dist_subtasks \
             WHERE task_id = $1 AND step = $2 AND state = $3 ORDER BY id"
        ))
        .bind(task_id)
        .bind(step.value())
        .bind(state)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_subtask).collect()
    }

    async fn get_subtask_cnt_group_by_states(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<HashMap<SubtaskState, i64>> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS cnt FROM dist_subtasks \
             WHERE task_id = $1 AND step = $2 GROUP BY state",
        )
        .bind(task_id)
        .bind(step.value())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let state: SubtaskState = row.try_get("state")?;
            let cnt: i64 = row.try_get("cnt")?;
            counts.insert(state, cnt);
        }
        Ok(counts)
    }

    async fn get_subtask_row_count(&self, task_id: i64, step: Step) -> DistTaskResult<i64> {
        let row = sqlx::query(
            "SELECT CAST(COALESCE(SUM(json_extract(summary, '$.row_count')), 0) AS INTEGER) AS row_count \
             FROM dist_subtasks WHERE task_id = $1 AND step = $2",
        )
        .bind(task_id)
        .bind(step.value())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("row_count")?)
    }

    async fn update_subtask_row_count(
        &self,
        subtask_id: i64,
        row_count: i64,
    ) -> DistTaskResult<()> {
        sqlx::query(
            "UPDATE dist_subtasks SET summary = json_set(summary, '$.row_count', $1) WHERE id = $2",
        )
        .bind(row_count)
        .bind(subtask_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn collect_subtask_errors(
        &self,
        task_id: i64,
    ) -> DistTaskResult<Vec<Option<TaskError>>> {
        let rows = sqlx::query(
            "SELECT error FROM dist_subtasks WHERE task_id = $1 AND state IN ($2, $3) ORDER BY id",
        )
        .bind(task_id)
        .bind(SubtaskState::Failed)
        .bind(SubtaskState::Canceled)
        .fetch_all(&self.pool)
        .await?;

        let mut errors = Vec::with_capacity(rows.len());
        for row in rows {
            let bytes: Option<Vec<u8>> = row.try_get("error")?;
            errors.push(bytes.as_deref().and_then(deserialize_err));
        }
        Ok(errors)
    }

    #[instrument(skip(self))]
    async fn start_subtask(&self, subtask_id: i64, exec_id: &str) -> DistTaskResult<()> {
        let now = self.now();
        let result = sqlx::query(
            "UPDATE dist_subtasks SET state = $1, start_time = $2, state_update_time = $2 \
             WHERE id = $3 AND exec_id = $4",
        )
        .bind(SubtaskState::Running)
        .bind(now)
        .bind(subtask_id)
        .bind(exec_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DistTaskError::subtask_not_found(subtask_id, exec_id));
        }

        debug!("启动子任务成功: {}", subtask_id);
        Ok(())
    }

    #[instrument(skip(self, err))]
    async fn update_subtask_state_and_error(
        &self,
        exec_id: &str,
        subtask_id: i64,
        state: SubtaskState,
        err: Option<&TaskError>,
    ) -> DistTaskResult<()> {
        sqlx::query(
            "UPDATE dist_subtasks SET state = $1, error = $2, state_update_time = $3 \
             WHERE id = $4 AND exec_id = $5",
        )
        .bind(state)
        .bind(serialize_err(err))
        .bind(self.now())
        .bind(subtask_id)
        .bind(exec_id)
        .execute(&self.pool)
        .await?;

        debug!("更新子任务状态成功: {} -> {}", subtask_id, state);
        Ok(())
    }

    #[instrument(skip(self, meta))]
    async fn finish_subtask(
        &self,
        exec_id: &str,
        subtask_id: i64,
        meta: &[u8],
    ) -> DistTaskResult<()> {
        let now = self.now();
        sqlx::query(
            "UPDATE dist_subtasks SET meta = $1, state = $2, state_update_time = $3, end_time = $3 \
             WHERE id = $4 AND exec_id = $5",
        )
        .bind(meta)
        .bind(SubtaskState::Succeed)
        .bind(now)
        .bind(subtask_id)
        .bind(exec_id)
        .execute(&self.pool)
        .await?;

        debug!("子任务执行完成: {}", subtask_id);
        Ok(())
    }

    #[instrument(skip(self, err))]
    async fn fail_subtask(
        &self,
        exec_id: &str,
        task_id: i64,
        err: Option<&TaskError>,
    ) -> DistTaskResult<()> {
        let Some(err) = err else {
            return Ok(());
        };

        let now = self.now();
        let result = sqlx::query(
            r#"
            UPDATE dist_subtasks
            SET state = $1, error = $2, start_time = $3, state_update_time = $3, end_time = $3
            WHERE id = (
                SELECT id FROM dist_subtasks
                WHERE exec_id = $4 AND task_id = $5 AND state IN ($6, $7)
                ORDER BY id LIMIT 1
            )
            "#,
        )
        .bind(SubtaskState::Failed)
        .bind(serialize_err(Some(err)))
        .bind(now)
        .bind(exec_id)
        .bind(task_id)
        .bind(SubtaskState::Pending)
        .bind(SubtaskState::Running)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("没有可标记为失败的子任务: task_id={}, exec_id={}", task_id, exec_id);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_subtask(&self, exec_id: &str, task_id: i64) -> DistTaskResult<()> {
        let now = self.now();
        sqlx::query(
            r#"
            UPDATE dist_subtasks
            SET state = $1, start_time = $2, state_update_time = $2, end_time = $2
            WHERE id = (
                SELECT id FROM dist_subtasks
                WHERE exec_id = $3 AND task_id = $4 AND state IN ($5, $6)
                ORDER BY id LIMIT 1
            )
            "#,
        )
        .bind(SubtaskState::Canceled)
        .bind(now)
        .bind(exec_id)
        .bind(task_id)
        .bind(SubtaskState::Pending)
        .bind(SubtaskState::Running)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn pause_subtasks(&self, exec_id: &str, task_id: i64) -> DistTaskResult<()> {
        let result = sqlx::query(
            "UPDATE dist_subtasks SET state = $1 \
             WHERE task_id = $2 AND exec_id = $3 AND state IN ($4, $5)",
        )
        .bind(SubtaskState::Paused)
        .bind(task_id)
        .bind(exec_id)
        .bind(SubtaskState::Pending)
        .bind(SubtaskState::Running)
        .execute(&self.pool)
        .await?;

        info!("暂停子任务 {} 个", result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume_subtasks(&self, task_id: i64) -> DistTaskResult<()> {
        let result = sqlx::query(
            "UPDATE dist_subtasks SET state = $1, error = NULL WHERE task_id = $2 AND state = $3",
        )
        .bind(SubtaskState::Pending)
        .bind(task_id)
        .bind(SubtaskState::Paused)
        .execute(&self.pool)
        .await?;

        info!("恢复子任务 {} 个", result.rows_affected());
        Ok(())
    }

    async fn running_subtasks_back_to_pending(
        &self,
        subtasks: &[Subtask],
    ) -> DistTaskResult<()> {
        if subtasks.is_empty() {
            return Ok(());
        }

        let now = self.now();
        let mut tx = self.pool.begin().await?;
        for subtask in subtasks {
            sqlx::query(
                "UPDATE dist_subtasks SET state = $1, state_update_time = $2 \
                 WHERE id = $3 AND exec_id = $4 AND state = $5",
            )
            .bind(SubtaskState::Pending)
            .bind(now)
            .bind(subtask.id)
            .bind(&subtask.exec_id)
            .bind(SubtaskState::Running)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("运行中的子任务回退为待执行: {} 个", subtasks.len());
        Ok(())
    }

    /// 只有状态仍与快照一致的子任务才会被改派
    async fn update_subtasks_exec_ids(&self, subtasks: &[Subtask]) -> DistTaskResult<()> {
        if subtasks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for subtask in subtasks {
            sqlx::query("UPDATE dist_subtasks SET exec_id = $1 WHERE id = $2 AND state = $3")
                .bind(&subtask.exec_id)
                .bind(subtask.id)
                .bind(subtask.state)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("更新子任务执行节点: {} 个", subtasks.len());
        Ok(())
    }

    async fn delete_subtasks_by_task_id(&self, task_id: i64) -> DistTaskResult<()> {
        let result = sqlx::query("DELETE FROM dist_subtasks WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        debug!("删除任务 {} 的子任务 {} 个", task_id, result.rows_affected());
        Ok(())
    }

    async fn get_task_executor_ids_by_task_id(&self, task_id: i64) -> DistTaskResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT exec_id FROM dist_subtasks WHERE task_id = $1 ORDER BY exec_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("exec_id").map_err(DistTaskError::from))
            .collect()
    }

    async fn get_task_executor_ids_by_task_id_and_step(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT exec_id FROM dist_subtasks WHERE task_id = $1 AND step = $2 ORDER BY exec_id",
        )
        .bind(task_id)
        .bind(step.value())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("exec_id").map_err(DistTaskError::from))
            .collect()
    }

    async fn get_previous_subtask_metas(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<Vec<Vec<u8>>> {
        let rows = sqlx::query(
            "SELECT meta FROM dist_subtasks WHERE task_id = $1 AND step = $2 AND state = $3 ORDER BY id",
        )
        .bind(task_id)
        .bind(step.value())
        .bind(SubtaskState::Succeed)
        .fetch_all(&self.pool)
        .await?;

        let mut metas = Vec::with_capacity(rows.len());
        for row in rows {
            let meta: Option<Vec<u8>> = row.try_get("meta")?;
            metas.push(meta.unwrap_or_default());
        }
        Ok(metas)
    }

    async fn get_subtasks_with_history(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<Vec<Subtask>> {
        let mut tx = self.pool.begin().await?;

        let mut rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM dist_subtasks WHERE task_id = $1 AND step = $2 ORDER BY id"
        ))
        .bind(task_id)
        .bind(step.value())
        .fetch_all(&mut *tx)
        .await?;

        let history = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM dist_subtask_history WHERE task_id = $1 AND step = $2 ORDER BY id"
        ))
        .bind(task_id)
        .bind(step.value())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.extend(history);
        rows.iter().map(row_to_subtask).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_support::{setup_test_db, test_clock, TEST_NOW};
    use disttask_domain::entities::TaskType;

    async fn insert_subtask(
        pool: &SqlitePool,
        task_id: i64,
        step: i64,
        exec_id: &str,
        state: SubtaskState,
    ) -> i64 {
        sqlx::query(
            "INSERT INTO dist_subtasks (step, task_id, type, exec_id, state, concurrency, create_time, ordinal, meta) \
             VALUES ($1, $2, $3, $4, $5, 4, 0, 1, X'6D')",
        )
        .bind(step)
        .bind(task_id)
        .bind(TaskType::Example.to_code())
        .bind(exec_id)
        .bind(state)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn setup_repo() -> (SqlitePool, SqliteSubtaskRepository) {
        let pool = setup_test_db().await;
        let repo = SqliteSubtaskRepository::new(pool.clone(), test_clock());
        (pool, repo)
    }

    #[tokio::test]
    async fn test_query_by_step_and_states() {
        let (pool, repo) = setup_repo().await;
        let s1 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;
        let s2 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;
        insert_subtask(&pool, 1, 1, "n2", SubtaskState::Pending).await;
        insert_subtask(&pool, 1, 2, "n1", SubtaskState::Pending).await;

        let subtasks = repo
            .get_subtasks_by_step_and_states("n1", 1, Step(1), &SubtaskState::ACTIVE)
            .await
            .unwrap();
        assert_eq!(subtasks.iter().map(|s| s.id).collect::<Vec<_>>(), vec![s1, s2]);
        assert_eq!(subtasks[0].meta, b"m");

        let first = repo
            .get_first_subtask_in_states("n1", 1, Step(1), &[SubtaskState::Running])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, s2);

        assert!(repo
            .has_subtasks_in_states("n2", 1, Step(1), &[SubtaskState::Pending])
            .await
            .unwrap());
        assert!(!repo
            .has_subtasks_in_states("n2", 1, Step(1), &[SubtaskState::Running])
            .await
            .unwrap());

        let err = repo
            .get_subtasks_by_step_and_states("n1", 1, Step(1), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DistTaskError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_query_by_exec_ids() {
        let (pool, repo) = setup_repo().await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;
        insert_subtask(&pool, 1, 1, "n2", SubtaskState::Pending).await;
        insert_subtask(&pool, 1, 1, "n3", SubtaskState::Pending).await;

        let subtasks = repo
            .get_subtasks_by_exec_ids_and_step_and_state(
                &["n1".to_string(), "n3".to_string()],
                1,
                Step(1),
                SubtaskState::Pending,
            )
            .await
            .unwrap();
        let exec_ids: Vec<_> = subtasks.iter().map(|s| s.exec_id.as_str()).collect();
        assert_eq!(exec_ids, vec!["n1", "n3"]);
    }

    #[tokio::test]
    async fn test_start_subtask_requires_owner() {
        let (pool, repo) = setup_repo().await;
        let id = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;

        let err = repo.start_subtask(id, "n2").await.unwrap_err();
        assert!(matches!(err, DistTaskError::SubtaskNotFound { .. }));

        repo.start_subtask(id, "n1").await.unwrap();
        let subtask = repo
            .get_first_subtask_in_states("n1", 1, Step(1), &[SubtaskState::Running])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(subtask.start_time.unwrap().timestamp(), TEST_NOW);
        assert_eq!(subtask.update_time.unwrap().timestamp(), TEST_NOW);
    }

    #[tokio::test]
    async fn test_finish_and_update_state() {
        let (pool, repo) = setup_repo().await;
        let s1 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;
        let s2 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;

        repo.finish_subtask("n1", s1, b"done").await.unwrap();
        let err = TaskError::new("ErrIO", "io");
        repo.update_subtask_state_and_error("n1", s2, SubtaskState::Failed, Some(&err))
            .await
            .unwrap();

        let succeed = repo
            .get_subtasks_by_step_and_state(1, Step(1), SubtaskState::Succeed)
            .await
            .unwrap();
        assert_eq!(succeed.len(), 1);
        assert_eq!(succeed[0].meta, b"done");

        let metas = repo.get_previous_subtask_metas(1, Step(1)).await.unwrap();
        assert_eq!(metas, vec![b"done".to_vec()]);

        let errors = repo.collect_subtask_errors(1).await.unwrap();
        assert_eq!(errors, vec![Some(err)]);

        let counts = repo.get_subtask_cnt_group_by_states(1, Step(1)).await.unwrap();
        assert_eq!(counts.get(&SubtaskState::Succeed), Some(&1));
        assert_eq!(counts.get(&SubtaskState::Failed), Some(&1));
        assert_eq!(counts.get(&SubtaskState::Pending), None);
    }

    #[tokio::test]
    async fn test_fail_subtask_marks_at_most_one() {
        let (pool, repo) = setup_repo().await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;

        repo.fail_subtask("n1", 1, None).await.unwrap();
        let counts = repo.get_subtask_cnt_group_by_states(1, Step(1)).await.unwrap();
        assert_eq!(counts.get(&SubtaskState::Pending), Some(&2));

        let err = TaskError::normalize("oom");
        repo.fail_subtask("n1", 1, Some(&err)).await.unwrap();
        let counts = repo.get_subtask_cnt_group_by_states(1, Step(1)).await.unwrap();
        assert_eq!(counts.get(&SubtaskState::Failed), Some(&1));
        assert_eq!(counts.get(&SubtaskState::Pending), Some(&1));
    }

    #[tokio::test]
    async fn test_cancel_subtask_marks_at_most_one() {
        let (pool, repo) = setup_repo().await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;

        repo.cancel_subtask("n1", 1).await.unwrap();
        let counts = repo.get_subtask_cnt_group_by_states(1, Step(1)).await.unwrap();
        assert_eq!(counts.get(&SubtaskState::Canceled), Some(&1));
        assert_eq!(counts.values().sum::<i64>(), 2);

        let errors = repo.collect_subtask_errors(1).await.unwrap();
        assert_eq!(errors, vec![None]);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (pool, repo) = setup_repo().await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;
        insert_subtask(&pool, 1, 1, "n2", SubtaskState::Running).await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Succeed).await;

        repo.pause_subtasks("n1", 1).await.unwrap();
        let counts = repo.get_subtask_cnt_group_by_states(1, Step(1)).await.unwrap();
        assert_eq!(counts.get(&SubtaskState::Paused), Some(&2));
        assert_eq!(counts.get(&SubtaskState::Running), Some(&1));

        repo.resume_subtasks(1).await.unwrap();
        let counts = repo.get_subtask_cnt_group_by_states(1, Step(1)).await.unwrap();
        assert_eq!(counts.get(&SubtaskState::Paused), None);
        assert_eq!(counts.get(&SubtaskState::Pending), Some(&2));
        assert_eq!(counts.get(&SubtaskState::Succeed), Some(&1));
    }

    #[tokio::test]
    async fn test_running_back_to_pending_and_reassign() {
        let (pool, repo) = setup_repo().await;
        let s1 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;
        let s2 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Pending).await;

        let active = repo.get_active_subtasks(1).await.unwrap();
        assert_eq!(active.len(), 2);

        repo.running_subtasks_back_to_pending(&active).await.unwrap();
        let pending = repo
            .get_subtasks_by_step_and_states("n1", 1, Step(1), &[SubtaskState::Pending])
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|s| s.id).collect::<Vec<_>>(), vec![s1, s2]);

        // s1 的快照状态已过期，不会被改派
        let mut moved = active.clone();
        for subtask in &mut moved {
            subtask.exec_id = "n2".to_string();
        }
        repo.update_subtasks_exec_ids(&moved).await.unwrap();

        assert_eq!(
            repo.get_task_executor_ids_by_task_id(1).await.unwrap(),
            vec!["n1".to_string(), "n2".to_string()]
        );
        let on_n2 = repo
            .get_subtasks_by_step_and_states("n2", 1, Step(1), &[SubtaskState::Pending])
            .await
            .unwrap();
        assert_eq!(on_n2.len(), 1);
        assert_eq!(on_n2[0].id, s2);
    }

    #[tokio::test]
    async fn test_row_count_summary() {
        let (pool, repo) = setup_repo().await;
        let s1 = insert_subtask(&pool, 1, 1, "n1", SubtaskState::Running).await;
        let s2 = insert_subtask(&pool, 1, 1, "n2", SubtaskState::Running).await;
        insert_subtask(&pool, 1, 2, "n2", SubtaskState::Running).await;

        assert_eq!(repo.get_subtask_row_count(1, Step(1)).await.unwrap(), 0);

        repo.update_subtask_row_count(s1, 100).await.unwrap();
        repo.update_subtask_row_count(s2, 23).await.unwrap();
        repo.update_subtask_row_count(s2, 25).await.unwrap();

        assert_eq!(repo.get_subtask_row_count(1, Step(1)).await.unwrap(), 125);
        assert_eq!(repo.get_subtask_row_count(1, Step(2)).await.unwrap(), 0);

        let subtasks = repo
            .get_subtasks_by_step_and_states("n1", 1, Step(1), &[SubtaskState::Running])
            .await
            .unwrap();
        assert_eq!(subtasks[0].summary.row_count, 100);
    }

    #[tokio::test]
    async fn test_executor_ids_by_step_and_delete() {
        let (pool, repo) = setup_repo().await;
        insert_subtask(&pool, 1, 1, "n1", SubtaskState::Succeed).await;
        insert_subtask(&pool, 1, 2, "n2", SubtaskState::Pending).await;
        insert_subtask(&pool, 2, 1, "n3", SubtaskState::Pending).await;

        assert_eq!(
            repo.get_task_executor_ids_by_task_id_and_step(1, Step(2))
                .await
                .unwrap(),
            vec!["n2".to_string()]
        );

        repo.delete_subtasks_by_task_id(1).await.unwrap();
        assert!(repo.get_task_executor_ids_by_task_id(1).await.unwrap().is_empty());
        assert_eq!(
            repo.get_task_executor_ids_by_task_id(2).await.unwrap(),
            vec!["n3".to_string()]
        );
    }
}
