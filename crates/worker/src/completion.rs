//! 任务完成判定与收尾

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use measurement_core::models::TaskType;
use measurement_core::traits::{job_name, FieldUpdate, JobScheduler, Precondition, TaskStore};
use measurement_core::{Result, SequenceCounters, TaskMetadata, TaskStatus};

/// 所有区域都至少执行过一次
pub fn all_regions_started(counters: &SequenceCounters) -> bool {
    counters.values().all(|count| *count > 0)
}

/// 所有区域的执行总次数，仅用于日志
pub fn total_runs(counters: &SequenceCounters) -> u64 {
    counters.values().sum()
}

/// 本区域已执行过，且结束时间未设置或已经到达
pub fn region_window_closed(task: &TaskMetadata, region: &str, now: DateTime<Utc>) -> bool {
    task.sequence_of(region) > 0 && task.schedule.window_closed(now)
}

/// 单个区域执行端上的完成判定
#[derive(Clone)]
pub struct CompletionTracker {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<dyn JobScheduler>,
    project_id: String,
    region: String,
}

impl CompletionTracker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<dyn JobScheduler>,
        project_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scheduler,
            project_id: project_id.into(),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// 删除本区域的周期作业，失败只记录日志
    pub async fn remove_region_job(&self, task: &TaskMetadata) {
        if !task.task_type.uses_scheduler() {
            return;
        }
        let name = job_name(&self.project_id, &self.region, &task.id);
        match self.scheduler.delete_job(&name).await {
            Ok(true) => info!(task_id = %task.id, "已删除区域作业: {}", name),
            Ok(false) => debug!(task_id = %task.id, "区域作业已不存在: {}", name),
            Err(e) => warn!(task_id = %task.id, "删除区域作业失败: {}: {}", name, e),
        }
    }

    /// 判定任务在本区域是否已完成；完成时清理作业，所有区域都已开始时收尾
    ///
    /// 收尾是条件更新（仅 `running` 时生效），重复调用不会改写 `stopTime`。
    pub async fn evaluate(&self, task: &TaskMetadata, now: DateTime<Utc>) -> Result<bool> {
        if !region_window_closed(task, &self.region, now) {
            return Ok(false);
        }

        self.remove_region_job(task).await;

        if all_regions_started(&task.number_of_sequence) && task.status == TaskStatus::Running {
            let finalized = self
                .store
                .update_fields_if(
                    &task.id,
                    &Precondition::StatusIn(vec![TaskStatus::Running]),
                    &[
                        FieldUpdate::StopTime(now),
                        FieldUpdate::Status(TaskStatus::Finished),
                    ],
                )
                .await?;
            if finalized {
                info!(
                    task_id = %task.id,
                    "任务已完成，共执行 {} 次",
                    total_runs(&task.number_of_sequence)
                );
            }
        }

        Ok(true)
    }
}
