use serde::{Deserialize, Serialize};

/// 历史子任务默认保留 14 天
pub const DEFAULT_SUBTASK_KEEP_DAYS: u64 = 14;

const MIB: u64 = 1024 * 1024;

/// 协调存储层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 历史子任务保留时长（秒）
    pub subtask_history_keep_seconds: u64,
    /// 单批插入子任务 meta 总大小上限（字节）
    pub max_subtask_batch_size: u64,
    /// 存储引擎单个事务的总大小上限（字节）
    pub txn_total_size_limit: u64,
    /// 同时运行的最大任务数
    pub max_concurrent_task: u32,
    /// 本节点上报的 CPU 数，未设置时取本机可用并行度
    pub cpu_count: Option<i64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            subtask_history_keep_seconds: DEFAULT_SUBTASK_KEEP_DAYS * 24 * 60 * 60,
            max_subtask_batch_size: 16 * MIB,
            txn_total_size_limit: 100 * MIB,
            max_concurrent_task: 16,
            cpu_count: None,
        }
    }
}

impl StorageConfig {
    /// 分批插入子任务时每批的字节上限
    pub fn subtask_batch_size_limit(&self) -> u64 {
        self.max_subtask_batch_size.min(self.txn_total_size_limit)
    }

    /// 调度器一次读取未完成任务的数量上限
    pub fn top_unfinished_task_limit(&self) -> i64 {
        i64::from(self.max_concurrent_task) * 2
    }

    pub fn effective_cpu_count(&self) -> i64 {
        self.cpu_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() as i64)
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.subtask_history_keep_seconds == 0 {
            return Err(anyhow::anyhow!("历史子任务保留时长必须大于0"));
        }

        if self.max_subtask_batch_size == 0 || self.txn_total_size_limit == 0 {
            return Err(anyhow::anyhow!("子任务批大小上限必须大于0"));
        }

        if self.max_concurrent_task == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if let Some(cpu_count) = self.cpu_count {
            if cpu_count < 0 {
                return Err(anyhow::anyhow!("CPU数不能为负数: {cpu_count}"));
            }
        }

        Ok(())
    }
}
