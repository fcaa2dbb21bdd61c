use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistTaskError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库迁移错误: {0}")]
    Migration(String),
    /// 按 ID 查找的任务不存在
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    /// 按 key 查找的任务不存在，与 `TaskNotFound` 同属“任务未找到”，
    /// 需要同时处理两者时使用 [`DistTaskError::is_not_found`]
    #[error("任务未找到: key={key}")]
    TaskKeyNotFound { key: String },
    #[error("任务已存在: key={key}")]
    TaskAlreadyExists { key: String },
    #[error("子任务未找到: id={id}, exec_id={exec_id}")]
    SubtaskNotFound { id: i64, exec_id: String },
    #[error("子任务不稳定: 期望 {expected} 个, 实际已存在 {actual} 个")]
    UnstableSubtasks { expected: usize, actual: usize },
    #[error("没有可管理的节点")]
    NoManagedNodes,
    #[error("没有可管理的节点拥有足够的资源运行分布式任务")]
    NoUsableCapacity,
    #[error("任务并发度({concurrency})大于可管理节点的CPU数({cpu_count})")]
    ConcurrencyExceedsCapacity { concurrency: i64, cpu_count: i64 },
    #[error("无效的任务状态转换, 状态已被修改: task_id={task_id}")]
    InvalidStateTransform { task_id: i64 },
    #[error("无效的参数: {0}")]
    InvalidArgument(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DistTaskResult<T> = Result<T, DistTaskError>;

impl DistTaskError {
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn task_key_not_found<S: Into<String>>(key: S) -> Self {
        Self::TaskKeyNotFound { key: key.into() }
    }
    pub fn task_already_exists<S: Into<String>>(key: S) -> Self {
        Self::TaskAlreadyExists { key: key.into() }
    }
    pub fn subtask_not_found<S: Into<String>>(id: i64, exec_id: S) -> Self {
        Self::SubtaskNotFound {
            id,
            exec_id: exec_id.into(),
        }
    }
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DistTaskError::TaskNotFound { .. }
                | DistTaskError::TaskKeyNotFound { .. }
                | DistTaskError::SubtaskNotFound { .. }
        )
    }
    /// 存储层连接类错误可由调用方重试，数据完整性类错误不可盲目重试
    pub fn is_retryable(&self) -> bool {
        match self {
            DistTaskError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DistTaskError::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DistTaskError {
    fn from(err: serde_json::Error) -> Self {
        DistTaskError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DistTaskError {
    fn from(err: anyhow::Error) -> Self {
        DistTaskError::Internal(err.to_string())
    }
}
