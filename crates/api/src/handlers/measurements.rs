use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info_span, Instrument};

use measurement_core::traits::MeasurementInvocation;
use measurement_worker::AgentOutcome;

use crate::{
    error::{ApiError, ApiResult},
    middleware::BenchmarkParams,
    response::{success, ApiResponse},
    routes::AppState,
    trace::TraceContext,
};

/// 执行端入口：由调度器或分发端调用，执行一次测量
pub async fn run_measurement(
    State(state): State<AppState>,
    trace: TraceContext,
    Query(bench): Query<BenchmarkParams>,
    payload: Result<Json<MeasurementInvocation>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(invocation) = payload?;
    let task_id = invocation.id.trim();
    if task_id.is_empty() {
        return Err(ApiError::BadRequest("缺少任务ID".to_string()));
    }
    let agent = state.agent()?;

    let outcome = agent
        .handle_with_benchmark(task_id, bench.tag())
        .instrument(info_span!("run_measurement", trace = %trace.trace()))
        .await
        .inspect_err(|e| error!(task_id = %task_id, "测量执行失败: {}", e))?;

    Ok(match outcome {
        AgentOutcome::Measured(result) => success(result).into_response(),
        other => {
            let message = other.message().unwrap_or_default().to_string();
            ApiResponse::success_empty_with_message(message).into_response()
        }
    })
}
