//! 分布式后台任务框架的协调存储
//!
//! 调度器与执行器通过 [`TaskManager`] 读写任务、子任务与节点信息，
//! 所有跨进程的协调都落在数据库的条件更新上。

pub mod logging;

pub use disttask_core::{AppConfig, DatabaseConfig, LoggingConfig, StorageConfig};
pub use disttask_domain::{entities, ports, repositories, task_error};
pub use disttask_errors::{DistTaskError, DistTaskResult};
pub use disttask_infrastructure::{DatabaseManager, TaskManager};
pub use logging::init_logging;

use anyhow::{Context, Result};
use tracing::info;

/// 加载配置、初始化日志并打开任务存储
///
/// `config_path` 为空时按默认路径查找配置文件，找不到则使用默认配置与环境变量。
pub async fn bootstrap(config_path: Option<&str>) -> Result<TaskManager> {
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    init_logging(&config.logging.level, &config.logging.format)?;

    let manager = TaskManager::connect(&config)
        .await
        .context("打开任务存储失败")?;

    info!("分布式任务存储启动完成: {}", config.database.url);
    Ok(manager)
}
