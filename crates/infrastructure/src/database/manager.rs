use std::sync::Arc;
use std::time::Duration;

use disttask_core::{DatabaseConfig, StorageConfig};
use disttask_domain::{
    ports::Clock,
    repositories::{
        HistoryRepository, NodeRepository, StepTransition, SubtaskRepository, TaskRepository,
    },
};
use disttask_errors::{DistTaskError, DistTaskResult};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::sqlite::{
    SqliteHistoryRepository, SqliteNodeRepository, SqliteStepTransition, SqliteSubtaskRepository,
    SqliteTaskRepository,
};

/// 持有连接池并负责创建各仓储实现
///
/// 所有仓储共享同一个池。会话型操作从池中取一条连接执行，
/// 事务型操作在池上开启事务，提交前的写入对其他连接不可见。
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> DistTaskResult<Self> {
        let mut options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        // 内存库随最后一条连接关闭而消失，连接不能被回收
        if config.url.contains(":memory:") {
            options = options.idle_timeout(None).max_lifetime(None);
        } else {
            options = options
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800));
        }

        let pool = options
            .connect(&config.url)
            .await
            .map_err(DistTaskError::Database)?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> DistTaskResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DistTaskError::Migration(e.to_string()))?;

        debug!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> DistTaskResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DistTaskError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn node_repository(&self, storage: &StorageConfig) -> Box<dyn NodeRepository> {
        Box::new(SqliteNodeRepository::new(
            self.pool.clone(),
            storage.effective_cpu_count(),
        ))
    }

    pub fn task_repository(
        &self,
        clock: Arc<dyn Clock>,
        storage: &StorageConfig,
    ) -> Box<dyn TaskRepository> {
        Box::new(SqliteTaskRepository::new(self.pool.clone(), clock, storage))
    }

    pub fn subtask_repository(&self, clock: Arc<dyn Clock>) -> Box<dyn SubtaskRepository> {
        Box::new(SqliteSubtaskRepository::new(self.pool.clone(), clock))
    }

    pub fn step_transition(
        &self,
        clock: Arc<dyn Clock>,
        storage: &StorageConfig,
    ) -> Box<dyn StepTransition> {
        Box::new(SqliteStepTransition::new(self.pool.clone(), clock, storage))
    }

    pub fn history_repository(
        &self,
        clock: Arc<dyn Clock>,
        storage: &StorageConfig,
    ) -> Box<dyn HistoryRepository> {
        Box::new(SqliteHistoryRepository::new(self.pool.clone(), clock, storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_lifecycle() {
        let manager = DatabaseManager::new(&DatabaseConfig::in_memory())
            .await
            .unwrap();
        manager.migrate().await.unwrap();
        // 重复迁移不会报错
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let nodes = manager.node_repository(&StorageConfig {
            cpu_count: Some(4),
            ..StorageConfig::default()
        });
        nodes.init_meta("node-1", "").await.unwrap();
        assert_eq!(nodes.get_cpu_count_of_managed_node().await.unwrap(), 4);

        manager.close().await;
        assert!(manager.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_file_database_persists_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("disttask.db").display()),
            ..DatabaseConfig::default()
        };
        let storage = StorageConfig {
            cpu_count: Some(2),
            ..StorageConfig::default()
        };

        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager
            .node_repository(&storage)
            .init_meta("node-1", "background")
            .await
            .unwrap();
        manager.close().await;

        let reopened = DatabaseManager::new(&config).await.unwrap();
        reopened.migrate().await.unwrap();
        let nodes = reopened.node_repository(&storage).get_managed_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].role, "background");
        reopened.close().await;
    }
}
