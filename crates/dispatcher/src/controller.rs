use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use measurement_core::models::{RegionResults, TaskResults, TaskType};
use measurement_core::traits::{FieldUpdate, Precondition, TaskStore};
use measurement_core::{
    CreateTaskRequest, MeasurementError, RegionError, Result, TaskMetadata, TaskStatus,
};

use crate::dispatch::Dispatcher;
use crate::task_id::TaskIdGenerator;

/// 生成任务ID时的最大碰撞重试次数
pub const MAX_ID_ATTEMPTS: usize = 10;

/// 创建成功的任务，`warnings` 为部分区域分发失败的记录
#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub id: String,
    pub warnings: Vec<RegionError>,
}

/// 结果查询：任务尚未开始执行时返回 `NotReady`
#[derive(Debug, Clone)]
pub enum ResultsView {
    NotReady,
    Ready(TaskResults),
}

/// 任务生命周期管理：创建、取消、状态与结果查询
pub struct TaskController {
    store: Arc<dyn TaskStore>,
    dispatcher: Dispatcher,
    id_generator: Arc<dyn TaskIdGenerator>,
}

impl TaskController {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Dispatcher,
        id_generator: Arc<dyn TaskIdGenerator>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            id_generator,
        }
    }

    /// 生成未被占用的任务ID
    async fn allocate_id(&self) -> Result<String> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.id_generator.generate();
            if !self.store.exists(&id).await? {
                return Ok(id);
            }
            warn!("任务ID碰撞，重新生成: {} (第 {} 次)", id, attempt);
        }
        Err(MeasurementError::IdExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    /// 创建任务并分发到所有区域
    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
        trace_context: Option<&str>,
    ) -> Result<CreatedTask> {
        request.validate(Utc::now())?;

        let id = self.allocate_id().await?;
        let task = TaskMetadata::from_request(id.clone(), request);
        self.store.create(&task).await?;
        info!(
            task_id = %id,
            "任务已创建: 类型={}, 探测={}, 区域={:?}",
            task.task_type, task.probe, task.vantage_points
        );
        metrics::counter!("measurement_tasks_created_total", "type" => task.task_type.as_str())
            .increment(1);

        let outcome = self.dispatcher.dispatch(&task, trace_context).await;
        if !outcome.is_success() {
            error!(task_id = %id, "所有区域分发均失败，任务标记为失败");
            self.store
                .update_fields_if(
                    &id,
                    &Precondition::StatusIn(vec![TaskStatus::Scheduled]),
                    &[FieldUpdate::Status(TaskStatus::Failed)],
                )
                .await?;
            return Err(MeasurementError::DispatchFailed {
                id,
                errors: outcome.errors,
            });
        }

        Ok(CreatedTask {
            id,
            warnings: outcome.errors,
        })
    }

    /// 取消任务：所有区域的周期作业删除成功后才记为已取消
    pub async fn cancel_task(&self, id: &str) -> Result<()> {
        let task = self.load(id).await?;

        if task.status.is_terminal() {
            return Err(MeasurementError::InvalidState(format!(
                "任务 {} 已处于 {} 状态，无法取消",
                id, task.status
            )));
        }
        if task.task_type == TaskType::OneOffAsap {
            return Err(MeasurementError::InvalidState(format!(
                "任务 {id} 为一次性立即执行任务，没有可取消的调度作业"
            )));
        }

        let errors = self.dispatcher.delete_jobs(&task).await;
        if !errors.is_empty() {
            error!(task_id = %id, "取消任务失败，{} 个区域删除作业失败", errors.len());
            return Err(MeasurementError::PartialFailure { errors });
        }

        let cancelled = self
            .store
            .update_fields_if(
                id,
                &Precondition::StatusIn(vec![TaskStatus::Scheduled, TaskStatus::Running]),
                &[FieldUpdate::Status(TaskStatus::Cancelled)],
            )
            .await?;
        if !cancelled {
            return Err(MeasurementError::InvalidState(format!(
                "任务 {id} 的状态已在取消过程中变更"
            )));
        }

        info!(task_id = %id, "任务已取消");
        Ok(())
    }

    pub async fn task_status(&self, id: &str) -> Result<TaskStatus> {
        Ok(self.load(id).await?.status)
    }

    /// 读取任务元数据与所有区域的测量结果
    pub async fn task_results(&self, id: &str) -> Result<ResultsView> {
        let metadata = self.load(id).await?;
        if metadata.status == TaskStatus::Scheduled {
            debug!(task_id = %id, "任务尚未开始执行，结果未就绪");
            return Ok(ResultsView::NotReady);
        }

        let mut results = RegionResults::new();
        for region in self.store.list_regions(id).await? {
            let by_sequence: BTreeMap<_, _> = self
                .store
                .list_results(id, &region)
                .await?
                .into_iter()
                .map(|r| (r.sequence, r))
                .collect();
            results.insert(region, by_sequence);
        }

        Ok(ResultsView::Ready(TaskResults { metadata, results }))
    }

    async fn load(&self, id: &str) -> Result<TaskMetadata> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| MeasurementError::task_not_found(id))
    }
}
