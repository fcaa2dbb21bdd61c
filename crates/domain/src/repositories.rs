//! 领域仓储抽象
//!
//! 调度器与执行器两侧都只依赖这些接口。所有并发协调都通过带条件的写入
//! 与受影响行数完成，实现方不得引入进程内锁。

use std::collections::HashMap;

use async_trait::async_trait;
use disttask_errors::DistTaskResult;

use crate::entities::{ManagedNode, Step, Subtask, SubtaskState, Task, TaskState, TaskType};
use crate::task_error::TaskError;

/// 节点注册表
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 插入或覆盖节点信息（CPU 数与角色）
    async fn init_meta(&self, node_id: &str, role: &str) -> DistTaskResult<()>;
    /// 插入节点信息，已存在时只刷新 CPU 数，角色只能通过管理路径修改
    async fn recover_meta(&self, node_id: &str, role: &str) -> DistTaskResult<()>;
    async fn get_all_nodes(&self) -> DistTaskResult<Vec<ManagedNode>>;
    /// 存在 `background` 角色节点时返回它们，否则返回角色为空的节点
    async fn get_managed_nodes(&self) -> DistTaskResult<Vec<ManagedNode>>;
    /// 第一个 CPU 数大于 0 的可管理节点的 CPU 数
    async fn get_cpu_count_of_managed_node(&self) -> DistTaskResult<i64>;
    async fn delete_dead_nodes(&self, node_ids: &[String]) -> DistTaskResult<()>;
}

/// 任务存储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(
        &self,
        key: &str,
        task_type: TaskType,
        concurrency: i64,
        meta: &[u8],
    ) -> DistTaskResult<i64>;
    async fn get_one_task(&self) -> DistTaskResult<Option<Task>>;
    async fn get_top_unfinished_tasks(&self) -> DistTaskResult<Vec<Task>>;
    async fn get_tasks_in_states(&self, states: &[TaskState]) -> DistTaskResult<Vec<Task>>;
    async fn get_tasks_from_history_in_states(
        &self,
        states: &[TaskState],
    ) -> DistTaskResult<Vec<Task>>;
    async fn get_task_by_id(&self, task_id: i64) -> DistTaskResult<Task>;
    async fn get_task_by_id_with_history(&self, task_id: i64) -> DistTaskResult<Task>;
    async fn get_task_by_key(&self, key: &str) -> DistTaskResult<Task>;
    async fn get_task_by_key_with_history(&self, key: &str) -> DistTaskResult<Task>;
    /// 节点 -> 已占用的槽位数
    async fn get_used_slots_on_nodes(&self) -> DistTaskResult<HashMap<String, i64>>;
    async fn is_task_cancelling(&self, task_id: i64) -> DistTaskResult<bool>;
}

/// 步骤切换协议
#[async_trait]
pub trait StepTransition: Send + Sync {
    /// 在一个事务内推进任务步骤并插入新步骤的子任务。
    /// 任务已被其他调度器推进（或已不存在）时不做任何写入并返回成功。
    async fn switch_task_step(
        &self,
        task: &Task,
        next_state: TaskState,
        next_step: Step,
        subtasks: &[Subtask],
    ) -> DistTaskResult<()>;

    /// 分批插入子任务后推进任务步骤，可从上一次的部分插入处继续。
    async fn switch_task_step_in_batch(
        &self,
        task: &Task,
        next_state: TaskState,
        next_step: Step,
        subtasks: &[Subtask],
    ) -> DistTaskResult<()>;

    /// 旧的组合路径，返回值的第一项表示调用方是否可以重试
    async fn update_task_and_add_subtasks(
        &self,
        task: &Task,
        subtasks: &[Subtask],
        prev_state: TaskState,
    ) -> (bool, DistTaskResult<()>);
}

/// 子任务存储
#[async_trait]
pub trait SubtaskRepository: Send + Sync {
    async fn get_subtasks_by_step_and_states(
        &self,
        exec_id: &str,
        task_id: i64,
        step: Step,
        states: &[SubtaskState],
    ) -> DistTaskResult<Vec<Subtask>>;
    async fn get_subtasks_by_exec_ids_and_step_and_state(
        &self,
        exec_ids: &[String],
        task_id: i64,
        step: Step,
        state: SubtaskState,
    ) -> DistTaskResult<Vec<Subtask>>;
    async fn get_first_subtask_in_states(
        &self,
        exec_id: &str,
        task_id: i64,
        step: Step,
        states: &[SubtaskState],
    ) -> DistTaskResult<Option<Subtask>>;
    async fn has_subtasks_in_states(
        &self,
        exec_id: &str,
        task_id: i64,
        step: Step,
        states: &[SubtaskState],
    ) -> DistTaskResult<bool>;
    async fn get_active_subtasks(&self, task_id: i64) -> DistTaskResult<Vec<Subtask>>;
    async fn get_subtasks_by_step_and_state(
        &self,
        task_id: i64,
        step: Step,
        state: SubtaskState,
    ) -> DistTaskResult<Vec<Subtask>>;
    async fn get_subtask_cnt_group_by_states(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<HashMap<SubtaskState, i64>>;
    async fn get_subtask_row_count(&self, task_id: i64, step: Step) -> DistTaskResult<i64>;
    async fn update_subtask_row_count(&self, subtask_id: i64, row_count: i64)
        -> DistTaskResult<()>;
    async fn collect_subtask_errors(&self, task_id: i64)
        -> DistTaskResult<Vec<Option<TaskError>>>;
    /// 只有仍归属于 `exec_id` 的子任务才能启动
    async fn start_subtask(&self, subtask_id: i64, exec_id: &str) -> DistTaskResult<()>;
    async fn update_subtask_state_and_error(
        &self,
        exec_id: &str,
        subtask_id: i64,
        state: SubtaskState,
        err: Option<&TaskError>,
    ) -> DistTaskResult<()>;
    async fn finish_subtask(&self, exec_id: &str, subtask_id: i64, meta: &[u8])
        -> DistTaskResult<()>;
    /// 每次最多将一个 pending/running 子任务标记为失败，`err` 为空时什么都不做
    async fn fail_subtask(
        &self,
        exec_id: &str,
        task_id: i64,
        err: Option<&TaskError>,
    ) -> DistTaskResult<()>;
    /// 每次最多取消一个 pending/running 子任务
    async fn cancel_subtask(&self, exec_id: &str, task_id: i64) -> DistTaskResult<()>;
    async fn pause_subtasks(&self, exec_id: &str, task_id: i64) -> DistTaskResult<()>;
    async fn resume_subtasks(&self, task_id: i64) -> DistTaskResult<()>;
    async fn running_subtasks_back_to_pending(&self, subtasks: &[Subtask]) -> DistTaskResult<()>;
    async fn update_subtasks_exec_ids(&self, subtasks: &[Subtask]) -> DistTaskResult<()>;
    async fn delete_subtasks_by_task_id(&self, task_id: i64) -> DistTaskResult<()>;
    async fn get_task_executor_ids_by_task_id(&self, task_id: i64) -> DistTaskResult<Vec<String>>;
    async fn get_task_executor_ids_by_task_id_and_step(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<Vec<String>>;
    /// 某一步骤中已成功子任务的 meta
    async fn get_previous_subtask_metas(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<Vec<Vec<u8>>>;
    async fn get_subtasks_with_history(
        &self,
        task_id: i64,
        step: Step,
    ) -> DistTaskResult<Vec<Subtask>>;
}

/// 历史归档与保留期清理
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn transfer_tasks_to_history(&self, tasks: &[Task]) -> DistTaskResult<()>;
    async fn transfer_subtasks_to_history(&self, task_id: i64) -> DistTaskResult<()>;
    /// 返回删除的历史子任务行数
    async fn gc_subtasks(&self) -> DistTaskResult<u64>;
}
