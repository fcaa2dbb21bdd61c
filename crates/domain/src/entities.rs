use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use disttask_errors::DistTaskError;
use serde::{Deserialize, Serialize};

use crate::task_error::TaskError;

/// 普通优先级，数值越小越先调度
pub const NORMAL_PRIORITY: i64 = 512;

/// 节点角色：专用于后台任务的节点
pub const BACKGROUND_ROLE: &str = "background";

/// 以 TEXT 形式存储的枚举，为其实现 SQLite 的编解码
macro_rules! impl_sqlite_text_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(s.parse::<$ty>()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <String as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
            }
        }
    };
}

/// 任务状态
///
/// `pending → running → {reverting, cancelling, pausing, succeed}`，
/// `reverting → reverted`，`pausing → paused → resuming → running`，
/// `running`/`reverting` 可进入 `failed`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeed,
    Reverting,
    Failed,
    Reverted,
    Cancelling,
    Pausing,
    Paused,
    Resuming,
}

impl TaskState {
    /// 调度器仍需关注的状态
    pub const UNFINISHED: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Reverting,
        TaskState::Cancelling,
        TaskState::Pausing,
        TaskState::Resuming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeed => "succeed",
            TaskState::Reverting => "reverting",
            TaskState::Failed => "failed",
            TaskState::Reverted => "reverted",
            TaskState::Cancelling => "cancelling",
            TaskState::Pausing => "pausing",
            TaskState::Paused => "paused",
            TaskState::Resuming => "resuming",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeed | TaskState::Failed | TaskState::Reverted
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = DistTaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "running" => Ok(TaskState::Running),
            "succeed" => Ok(TaskState::Succeed),
            "reverting" => Ok(TaskState::Reverting),
            "failed" => Ok(TaskState::Failed),
            "reverted" => Ok(TaskState::Reverted),
            "cancelling" => Ok(TaskState::Cancelling),
            "pausing" => Ok(TaskState::Pausing),
            "paused" => Ok(TaskState::Paused),
            "resuming" => Ok(TaskState::Resuming),
            _ => Err(DistTaskError::Serialization(format!("无效的任务状态: {s}"))),
        }
    }
}

impl_sqlite_text_enum!(TaskState);

/// 子任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    Pending,
    Running,
    Succeed,
    Failed,
    Canceled,
    Paused,
    RevertPending,
    Reverting,
    Reverted,
    RevertFailed,
}

impl SubtaskState {
    /// 尚有未完成工作的状态
    pub const ACTIVE: [SubtaskState; 2] = [SubtaskState::Pending, SubtaskState::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskState::Pending => "pending",
            SubtaskState::Running => "running",
            SubtaskState::Succeed => "succeed",
            SubtaskState::Failed => "failed",
            SubtaskState::Canceled => "canceled",
            SubtaskState::Paused => "paused",
            SubtaskState::RevertPending => "revert_pending",
            SubtaskState::Reverting => "reverting",
            SubtaskState::Reverted => "reverted",
            SubtaskState::RevertFailed => "revert_failed",
        }
    }
}

impl fmt::Display for SubtaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtaskState {
    type Err = DistTaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubtaskState::Pending),
            "running" => Ok(SubtaskState::Running),
            "succeed" => Ok(SubtaskState::Succeed),
            "failed" => Ok(SubtaskState::Failed),
            "canceled" => Ok(SubtaskState::Canceled),
            "paused" => Ok(SubtaskState::Paused),
            "revert_pending" => Ok(SubtaskState::RevertPending),
            "reverting" => Ok(SubtaskState::Reverting),
            "reverted" => Ok(SubtaskState::Reverted),
            "revert_failed" => Ok(SubtaskState::RevertFailed),
            _ => Err(DistTaskError::Serialization(format!(
                "无效的子任务状态: {s}"
            ))),
        }
    }
}

impl_sqlite_text_enum!(SubtaskState);

/// 任务类型，任务表中以字符串存储，子任务表中以整数编码存储
///
/// 类型由创建任务的业务方解释，未登记的名称保存在 `Other` 中；
/// 其整数编码为 0，从编码无法还原名称。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Example,
    ImportInto,
    Backfill,
    Other(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Example => "Example",
            TaskType::ImportInto => "ImportInto",
            TaskType::Backfill => "backfill",
            TaskType::Other(name) => name.as_str(),
        }
    }

    pub fn to_code(&self) -> i64 {
        match self {
            TaskType::Example => 1,
            TaskType::ImportInto => 2,
            TaskType::Backfill => 3,
            TaskType::Other(_) => 0,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TaskType::Example,
            2 => TaskType::ImportInto,
            3 => TaskType::Backfill,
            _ => TaskType::Other(String::new()),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s {
            "Example" => TaskType::Example,
            "ImportInto" => TaskType::ImportInto,
            "backfill" => TaskType::Backfill,
            other => TaskType::Other(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        TaskType::from(s.as_str())
    }
}

impl From<TaskType> for String {
    fn from(tp: TaskType) -> Self {
        match tp {
            TaskType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for TaskType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TaskType::from(s))
    }
}

impl_sqlite_text_enum!(TaskType);

/// 任务步骤，单个任务生命周期内单调不减
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Step(pub i64);

impl Step {
    /// 尚未开始任何实际步骤
    pub const INIT: Step = Step(0);

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn next(&self) -> Step {
        Step(self.0 + 1)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Step::INIT {
            f.write_str("init")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub key: String,
    pub task_type: TaskType,
    pub state: TaskState,
    pub step: Step,
    pub priority: i64,
    pub concurrency: i64,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub state_update_time: Option<DateTime<Utc>>,
    pub meta: Vec<u8>,
    pub scheduler_id: String,
    pub error: Option<TaskError>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务 '{}' (ID: {}, 类型: {}, 状态: {}, 步骤: {})",
            self.key, self.id, self.task_type, self.state, self.step
        )
    }
}

/// 子任务摘要，执行器在运行过程中逐步更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSummary {
    #[serde(default)]
    pub row_count: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: i64,
    pub step: Step,
    pub task_id: i64,
    pub task_type: TaskType,
    pub exec_id: String,
    pub state: SubtaskState,
    pub concurrency: i64,
    pub create_time: DateTime<Utc>,
    pub ordinal: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub meta: Vec<u8>,
    pub summary: SubtaskSummary,
    pub error: Option<TaskError>,
}

impl Subtask {
    /// 构造一个待插入的子任务，id 与时间由存储层填充
    pub fn new(
        step: Step,
        task_id: i64,
        task_type: TaskType,
        exec_id: impl Into<String>,
        concurrency: i64,
        meta: Vec<u8>,
        ordinal: i64,
    ) -> Self {
        Self {
            id: 0,
            step,
            task_id,
            task_type,
            exec_id: exec_id.into(),
            state: SubtaskState::Pending,
            concurrency,
            create_time: DateTime::<Utc>::default(),
            ordinal,
            start_time: None,
            update_time: None,
            meta,
            summary: SubtaskSummary::default(),
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        SubtaskState::ACTIVE.contains(&self.state)
    }
}

/// 可执行分布式任务的节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedNode {
    pub id: String,
    pub role: String,
    pub cpu_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_round_trip_through_str() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Succeed,
            TaskState::Reverting,
            TaskState::Failed,
            TaskState::Reverted,
            TaskState::Cancelling,
            TaskState::Pausing,
            TaskState::Paused,
            TaskState::Resuming,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("unknown".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_unfinished_states_exclude_terminal_and_paused() {
        assert!(TaskState::UNFINISHED.iter().all(|s| !s.is_terminal()));
        assert!(!TaskState::UNFINISHED.contains(&TaskState::Paused));
    }

    #[test]
    fn test_subtask_state_strings() {
        assert_eq!(SubtaskState::RevertPending.as_str(), "revert_pending");
        assert_eq!(
            "revert_pending".parse::<SubtaskState>().unwrap(),
            SubtaskState::RevertPending
        );
        assert_eq!(SubtaskState::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_task_type_codes() {
        for tp in [TaskType::Example, TaskType::ImportInto, TaskType::Backfill] {
            assert_eq!(TaskType::from_code(tp.to_code()), tp);
            assert_eq!(tp.as_str().parse::<TaskType>().unwrap(), tp);
        }
        assert_eq!(TaskType::from_code(0), TaskType::Other(String::new()));
        assert_eq!(TaskType::from_code(42), TaskType::Other(String::new()));
    }

    #[test]
    fn test_unregistered_task_type_keeps_its_name() {
        let tp: TaskType = "ddl_backfill".parse().unwrap();
        assert_eq!(tp, TaskType::Other("ddl_backfill".to_string()));
        assert_eq!(tp.as_str(), "ddl_backfill");
        assert_eq!(tp.to_code(), 0);

        assert_eq!(serde_json::to_string(&tp).unwrap(), "\"ddl_backfill\"");
        let known: TaskType = serde_json::from_str("\"ImportInto\"").unwrap();
        assert_eq!(known, TaskType::ImportInto);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::INIT.to_string(), "init");
        assert_eq!(Step::INIT.next(), Step(1));
        assert_eq!(Step(3).to_string(), "3");
    }

    #[test]
    fn test_summary_keeps_unknown_fields() {
        let summary: SubtaskSummary =
            serde_json::from_str(r#"{"row_count": 10, "bytes": 2048}"#).unwrap();
        assert_eq!(summary.row_count, 10);
        assert_eq!(summary.extra.get("bytes"), Some(&serde_json::json!(2048)));

        let empty: SubtaskSummary = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.row_count, 0);
    }
}
