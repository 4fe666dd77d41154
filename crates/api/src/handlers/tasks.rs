use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use measurement_core::{CreateTaskRequest, RegionError, TaskStatus};
use measurement_dispatcher::ResultsView;

use crate::{
    error::ApiResult,
    response::{accepted, created, no_content, success},
    routes::AppState,
    trace::TraceContext,
};

/// 任务创建响应，`warnings` 为分发失败的区域
#[derive(Debug, Serialize)]
pub struct CreatedTaskBody {
    pub id: String,
    pub warnings: Vec<RegionError>,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusBody {
    pub id: String,
    pub status: TaskStatus,
}

/// 创建任务
pub async fn create_task(
    State(state): State<AppState>,
    trace: TraceContext,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    let controller = state.controller()?;
    let span = info_span!("create_task", trace = %trace.trace());

    async move {
        let created_task = controller
            .create_task(request, trace.header())
            .await
            .inspect_err(|e| error!("创建任务失败: {}", e))?;

        let message = if created_task.warnings.is_empty() {
            None
        } else {
            warn!(
                task_id = %created_task.id,
                "任务已创建，{} 个区域分发失败", created_task.warnings.len()
            );
            Some(format!(
                "任务已创建，{} 个区域分发失败",
                created_task.warnings.len()
            ))
        };

        let body = CreatedTaskBody {
            id: created_task.id,
            warnings: created_task.warnings,
        };
        Ok(created(body, message).into_response())
    }
    .instrument(span)
    .await
}

/// 查询任务状态
pub async fn get_task_status(
    State(state): State<AppState>,
    trace: TraceContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let controller = state.controller()?;
    let status = controller
        .task_status(&id)
        .instrument(info_span!("task_status", task_id = %id, trace = %trace.trace()))
        .await?;
    Ok(success(TaskStatusBody { id, status }))
}

/// 查询任务结果，任务尚未开始时返回202
pub async fn get_task_results(
    State(state): State<AppState>,
    trace: TraceContext,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let controller = state.controller()?;
    let view = controller
        .task_results(&id)
        .instrument(info_span!("task_results", task_id = %id, trace = %trace.trace()))
        .await
        .inspect_err(|e| error!(task_id = %id, "读取任务结果失败: {}", e))?;

    Ok(match view {
        ResultsView::NotReady => accepted("任务尚未开始执行，结果未就绪").into_response(),
        ResultsView::Ready(results) => success(results).into_response(),
    })
}

/// 取消任务
pub async fn cancel_task(
    State(state): State<AppState>,
    trace: TraceContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let controller = state.controller()?;
    controller
        .cancel_task(&id)
        .instrument(info_span!("cancel_task", task_id = %id, trace = %trace.trace()))
        .await
        .inspect_err(|e| error!(task_id = %id, "取消任务失败: {}", e))?;

    info!(task_id = %id, "取消请求处理完成");
    Ok(no_content())
}
