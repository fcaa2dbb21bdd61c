//! 行到实体的映射
//!
//! 查询统一按固定的列顺序取数，映射函数只依赖列下标，因此同一套逻辑既能
//! 处理 `SqliteRow`，也能处理测试中手工构造的记录。

use chrono::{DateTime, Utc};
use disttask_domain::entities::{Step, Subtask, SubtaskState, SubtaskSummary, Task, TaskType};
use disttask_domain::task_error::deserialize_err;
use disttask_errors::{DistTaskError, DistTaskResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, ValueRef};
use tracing::warn;

/// 调度器扫描任务时只需要的列
pub const BASIC_TASK_COLUMNS: &str =
    "id, task_key, type, state, step, priority, concurrency, create_time";

pub const TASK_COLUMNS: &str = "id, task_key, type, state, step, priority, concurrency, \
     create_time, start_time, state_update_time, meta, scheduler_id, error";

pub const BASIC_SUBTASK_COLUMNS: &str =
    "id, step, task_id, type, exec_id, state, concurrency, create_time, ordinal";

pub const SUBTASK_COLUMNS: &str = "id, step, task_id, type, exec_id, state, concurrency, \
     create_time, ordinal, start_time, state_update_time, meta, summary, error";

/// 按列下标读取的记录
pub trait ColumnRecord {
    fn is_null(&self, idx: usize) -> bool;
    fn get_i64(&self, idx: usize) -> DistTaskResult<i64>;
    fn get_string(&self, idx: usize) -> DistTaskResult<String>;
    fn get_bytes(&self, idx: usize) -> DistTaskResult<Vec<u8>>;
}

impl ColumnRecord for SqliteRow {
    fn is_null(&self, idx: usize) -> bool {
        self.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
    }

    fn get_i64(&self, idx: usize) -> DistTaskResult<i64> {
        Ok(self.try_get::<i64, _>(idx)?)
    }

    fn get_string(&self, idx: usize) -> DistTaskResult<String> {
        Ok(self.try_get::<String, _>(idx)?)
    }

    fn get_bytes(&self, idx: usize) -> DistTaskResult<Vec<u8>> {
        Ok(self.try_get::<Vec<u8>, _>(idx)?)
    }
}

/// 内存中的列值
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRecord(pub Vec<ColumnValue>);

impl MemoryRecord {
    fn value(&self, idx: usize) -> DistTaskResult<&ColumnValue> {
        self.0
            .get(idx)
            .ok_or_else(|| DistTaskError::Internal(format!("列下标越界: {idx}")))
    }
}

impl ColumnRecord for MemoryRecord {
    fn is_null(&self, idx: usize) -> bool {
        matches!(self.0.get(idx), None | Some(ColumnValue::Null))
    }

    fn get_i64(&self, idx: usize) -> DistTaskResult<i64> {
        match self.value(idx)? {
            ColumnValue::Int(v) => Ok(*v),
            other => Err(DistTaskError::Serialization(format!(
                "列 {idx} 不是整数: {other:?}"
            ))),
        }
    }

    fn get_string(&self, idx: usize) -> DistTaskResult<String> {
        match self.value(idx)? {
            ColumnValue::Text(v) => Ok(v.clone()),
            ColumnValue::Bytes(v) => String::from_utf8(v.clone())
                .map_err(|e| DistTaskError::Serialization(format!("列 {idx} 不是UTF-8: {e}"))),
            other => Err(DistTaskError::Serialization(format!(
                "列 {idx} 不是文本: {other:?}"
            ))),
        }
    }

    fn get_bytes(&self, idx: usize) -> DistTaskResult<Vec<u8>> {
        match self.value(idx)? {
            ColumnValue::Bytes(v) => Ok(v.clone()),
            ColumnValue::Text(v) => Ok(v.as_bytes().to_vec()),
            other => Err(DistTaskError::Serialization(format!(
                "列 {idx} 不是字节: {other:?}"
            ))),
        }
    }
}

pub fn unix_to_time(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn optional_time(r: &impl ColumnRecord, idx: usize) -> DistTaskResult<Option<DateTime<Utc>>> {
    if r.is_null(idx) {
        return Ok(None);
    }
    Ok(Some(unix_to_time(r.get_i64(idx)?)))
}

fn optional_bytes(r: &impl ColumnRecord, idx: usize) -> DistTaskResult<Vec<u8>> {
    if r.is_null(idx) {
        return Ok(Vec::new());
    }
    r.get_bytes(idx)
}

/// 对应 [`BASIC_TASK_COLUMNS`]，其余字段保持默认值
pub fn row_to_task_basic(r: &impl ColumnRecord) -> DistTaskResult<Task> {
    Ok(Task {
        id: r.get_i64(0)?,
        key: r.get_string(1)?,
        task_type: TaskType::from(r.get_string(2)?),
        state: r.get_string(3)?.parse()?,
        step: Step(r.get_i64(4)?),
        priority: r.get_i64(5)?,
        concurrency: r.get_i64(6)?,
        create_time: unix_to_time(r.get_i64(7)?),
        start_time: None,
        state_update_time: None,
        meta: Vec::new(),
        scheduler_id: String::new(),
        error: None,
    })
}

/// 对应 [`TASK_COLUMNS`]
pub fn row_to_task(r: &impl ColumnRecord) -> DistTaskResult<Task> {
    let mut task = row_to_task_basic(r)?;
    task.start_time = optional_time(r, 8)?;
    task.state_update_time = optional_time(r, 9)?;
    task.meta = optional_bytes(r, 10)?;
    if !r.is_null(11) {
        task.scheduler_id = r.get_string(11)?;
    }
    task.error = deserialize_err(&optional_bytes(r, 12)?);
    Ok(task)
}

/// 对应 [`BASIC_SUBTASK_COLUMNS`]
pub fn row_to_subtask_basic(r: &impl ColumnRecord) -> DistTaskResult<Subtask> {
    let ordinal = if r.is_null(8) { 0 } else { r.get_i64(8)? };
    Ok(Subtask {
        id: r.get_i64(0)?,
        step: Step(r.get_i64(1)?),
        task_id: r.get_i64(2)?,
        task_type: TaskType::from_code(r.get_i64(3)?),
        exec_id: r.get_string(4)?,
        state: r.get_string(5)?.parse::<SubtaskState>()?,
        concurrency: r.get_i64(6)?,
        create_time: unix_to_time(r.get_i64(7)?),
        ordinal,
        start_time: None,
        update_time: None,
        meta: Vec::new(),
        summary: SubtaskSummary::default(),
        error: None,
    })
}

/// 对应 [`SUBTASK_COLUMNS`]；摘要无法解析时记录告警并置为空
pub fn row_to_subtask(r: &impl ColumnRecord) -> DistTaskResult<Subtask> {
    let mut subtask = row_to_subtask_basic(r)?;
    subtask.start_time = optional_time(r, 9)?;
    subtask.update_time = optional_time(r, 10)?;
    subtask.meta = optional_bytes(r, 11)?;
    if !r.is_null(12) {
        let raw = r.get_string(12)?;
        subtask.summary = serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("解析子任务摘要失败 (子任务ID: {}): {e}", subtask.id);
            SubtaskSummary::default()
        });
    }
    subtask.error = deserialize_err(&optional_bytes(r, 13)?);
    Ok(subtask)
}
