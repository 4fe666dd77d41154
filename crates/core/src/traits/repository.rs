//! 任务元数据存储接口
//!
//! 存储按任务ID组织：任务记录本身，以及按 区域/序号 组织的测量结果子集合。
//!
//! 所有修改都通过字段级更新完成，不做整条记录覆盖：同一任务的多个区域执行端
//! 可能并发推进 `status` 与 `numberOfSequence`，整条覆盖会丢失其他写入方的修改。
//! 读取方在每次 `await` 之后都应重新读取，而不是缓存记录。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{MeasurementResult, TaskMetadata, TaskStatus};
use crate::Result;

/// 单个字段的更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Status(TaskStatus),
    StartTime(DateTime<Utc>),
    StopTime(DateTime<Utc>),
    /// 将某区域的执行计数设置为给定值
    Sequence { region: String, value: u64 },
}

/// 条件更新的前置条件，在存储端原子地检查
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// 当前状态属于给定集合之一
    StatusIn(Vec<TaskStatus>),
    /// 某区域当前计数严格小于给定值
    SequenceBelow { region: String, value: u64 },
}

impl Precondition {
    pub fn holds(&self, task: &TaskMetadata) -> bool {
        match self {
            Precondition::StatusIn(statuses) => statuses.contains(&task.status),
            Precondition::SequenceBelow { region, value } => task.sequence_of(region) < *value,
        }
    }
}

/// 将字段更新应用到内存中的记录上，供各存储实现复用
pub fn apply_updates(task: &mut TaskMetadata, updates: &[FieldUpdate]) {
    for update in updates {
        match update {
            FieldUpdate::Status(status) => task.status = *status,
            FieldUpdate::StartTime(at) => task.schedule.start_time = Some(*at),
            FieldUpdate::StopTime(at) => task.schedule.stop_time = Some(*at),
            FieldUpdate::Sequence { region, value } => {
                task.number_of_sequence.insert(region.clone(), *value);
            }
        }
    }
}

/// 任务存储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 读取任务记录
    async fn get(&self, id: &str) -> Result<Option<TaskMetadata>>;

    /// 任务ID是否已被占用
    async fn exists(&self, id: &str) -> Result<bool>;

    /// 写入新任务，ID已存在时返回 `Conflict`
    async fn create(&self, task: &TaskMetadata) -> Result<()>;

    /// 无条件的字段级更新，任务不存在时返回 `TaskNotFound`
    async fn update_fields(&self, id: &str, updates: &[FieldUpdate]) -> Result<()>;

    /// 条件字段级更新，前置条件成立并完成写入时返回 `true`
    async fn update_fields_if(
        &self,
        id: &str,
        precondition: &Precondition,
        updates: &[FieldUpdate],
    ) -> Result<bool>;

    /// 列出已有测量结果的区域
    async fn list_regions(&self, id: &str) -> Result<Vec<String>>;

    /// 列出某区域的全部测量结果，按序号升序
    async fn list_results(&self, id: &str, region: &str) -> Result<Vec<MeasurementResult>>;

    /// 写入测量结果，同一 (任务, 区域, 序号) 已存在时返回 `Conflict`
    async fn insert_result(&self, id: &str, result: &MeasurementResult) -> Result<()>;
}
