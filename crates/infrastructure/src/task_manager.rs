//! 分布式任务框架存储的组合根
//!
//! 调度器与执行器通过同一个 [`TaskManager`] 访问全部仓储，不存在进程级的全局实例，
//! 需要共享时由调用方自行包进 `Arc`。

use std::sync::Arc;

use disttask_core::{AppConfig, StorageConfig};
use disttask_domain::{
    ports::{Clock, SystemClock},
    repositories::{
        HistoryRepository, NodeRepository, StepTransition, SubtaskRepository, TaskRepository,
    },
};
use disttask_errors::{DistTaskError, DistTaskResult};
use futures::future::BoxFuture;
use sqlx::SqliteConnection;
use tracing::info;

use crate::database::DatabaseManager;

pub struct TaskManager {
    db: DatabaseManager,
    storage: StorageConfig,
    nodes: Box<dyn NodeRepository>,
    tasks: Box<dyn TaskRepository>,
    subtasks: Box<dyn SubtaskRepository>,
    transitions: Box<dyn StepTransition>,
    history: Box<dyn HistoryRepository>,
}

impl TaskManager {
    pub fn new(db: DatabaseManager, storage: StorageConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: db.node_repository(&storage),
            tasks: db.task_repository(clock.clone(), &storage),
            subtasks: db.subtask_repository(clock.clone()),
            transitions: db.step_transition(clock.clone(), &storage),
            history: db.history_repository(clock, &storage),
            db,
            storage,
        }
    }

    /// 校验配置、建立连接池并执行迁移
    pub async fn connect(config: &AppConfig) -> DistTaskResult<Self> {
        config
            .validate()
            .map_err(|e| DistTaskError::config_error(format!("{e:#}")))?;

        let db = DatabaseManager::new(&config.database).await?;
        db.migrate().await?;

        info!("任务存储已就绪");
        Ok(Self::new(db, config.storage.clone(), Arc::new(SystemClock)))
    }

    pub fn nodes(&self) -> &dyn NodeRepository {
        self.nodes.as_ref()
    }

    pub fn tasks(&self) -> &dyn TaskRepository {
        self.tasks.as_ref()
    }

    pub fn subtasks(&self) -> &dyn SubtaskRepository {
        self.subtasks.as_ref()
    }

    pub fn transitions(&self) -> &dyn StepTransition {
        self.transitions.as_ref()
    }

    pub fn history(&self) -> &dyn HistoryRepository {
        self.history.as_ref()
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    /// 在一条独立的连接上执行 `f`，语句各自自动提交
    pub async fn with_new_session<F, T>(&self, f: F) -> DistTaskResult<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, DistTaskResult<T>> + Send,
        T: Send,
    {
        let mut conn = self.db.pool().acquire().await?;
        f(&mut *conn).await
    }

    /// 在新事务中执行 `f`，成功时提交；返回错误时事务随之丢弃并回滚
    pub async fn with_new_txn<F, T>(&self, f: F) -> DistTaskResult<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, DistTaskResult<T>> + Send,
        T: Send,
    {
        let mut tx = self.db.pool().begin().await?;
        let value = f(&mut *tx).await?;
        tx.commit().await?;
        Ok(value)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use disttask_core::DatabaseConfig;
    use disttask_domain::entities::TaskType;
    use sqlx::Row;

    async fn in_memory_manager() -> TaskManager {
        let config = AppConfig {
            database: DatabaseConfig::in_memory(),
            storage: StorageConfig {
                cpu_count: Some(8),
                ..StorageConfig::default()
            },
            ..AppConfig::default()
        };
        TaskManager::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/db".to_string();

        let err = TaskManager::connect(&config).await.err().unwrap();
        assert!(matches!(err, DistTaskError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_with_new_txn_commits_on_success() {
        let manager = in_memory_manager().await;

        manager
            .with_new_txn(|conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO dist_framework_meta (host, role, cpu_count) VALUES ('n1', '', 8)")
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, DistTaskError>(())
                })
            })
            .await
            .unwrap();

        let id = manager
            .tasks()
            .create_task("k", TaskType::Example, 8, b"")
            .await
            .unwrap();
        assert_eq!(manager.tasks().get_task_by_id(id).await.unwrap().key, "k");
    }

    #[tokio::test]
    async fn test_with_new_txn_rolls_back_on_error() {
        let manager = in_memory_manager().await;

        let result: DistTaskResult<()> = manager
            .with_new_txn(|conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO dist_framework_meta (host, role, cpu_count) VALUES ('n1', '', 8)")
                        .execute(&mut *conn)
                        .await?;
                    Err::<(), _>(DistTaskError::Internal("中止".to_string()))
                })
            })
            .await;
        assert!(result.is_err());

        let count = manager
            .with_new_session(|conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT COUNT(*) AS cnt FROM dist_framework_meta")
                        .fetch_one(&mut *conn)
                        .await?;
                    Ok::<_, DistTaskError>(row.try_get::<i64, _>("cnt")?)
                })
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
