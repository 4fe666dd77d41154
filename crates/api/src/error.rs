use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use measurement_core::{ErrorKind, MeasurementError};
use serde_json::json;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("请求方法不被允许")]
    MethodNotAllowed,

    #[error("服务未启用: {0}")]
    Disabled(&'static str),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn classify(err: &MeasurementError) -> (StatusCode, &'static str, Vec<String>) {
    match err {
        MeasurementError::InvalidCron { .. } => (
            StatusCode::BAD_REQUEST,
            "INVALID_CRON_EXPRESSION",
            strings(&[
                "请使用5段式标准Cron表达式",
                "示例: '*/10 * * * *' (每10分钟执行一次)",
            ]),
        ),
        MeasurementError::Parse { .. } | MeasurementError::InvalidSchedule(_) => (
            StatusCode::BAD_REQUEST,
            "INVALID_SCHEDULE",
            strings(&[
                "时间字段应为RFC3339格式，例如 2030-01-01T00:00:00Z",
                "开始与结束时间不能早于当前时间，且结束时间不能早于开始时间",
            ]),
        ),
        MeasurementError::DispatchFailed { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "DISPATCH_FAILED",
            strings(&["任务已标记为失败，请检查各区域执行端是否可用后重新创建"]),
        ),
        _ => match err.kind() {
            ErrorKind::Validation => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                strings(&["请检查 vantagePoints、probe 与 arguments 字段"]),
            ),
            ErrorKind::NotFound => (
                StatusCode::NOT_FOUND,
                "TASK_NOT_FOUND",
                strings(&["请检查任务ID是否正确"]),
            ),
            ErrorKind::InvalidState => (
                StatusCode::BAD_REQUEST,
                "INVALID_STATE",
                strings(&["使用 GET /api/v1/tasks/{id}/status 查看任务当前状态"]),
            ),
            ErrorKind::Conflict => (
                StatusCode::CONFLICT,
                "CONFLICT",
                strings(&["请求的操作与当前资源状态冲突", "请稍后重试"]),
            ),
            ErrorKind::PartialFailure => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PARTIAL_FAILURE",
                strings(&["部分区域操作失败，可重试该请求"]),
            ),
            ErrorKind::Dependency => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DEPENDENCY_ERROR",
                strings(&["依赖服务暂不可用，请稍后重试"]),
            ),
            ErrorKind::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                strings(&["系统遇到内部错误，请稍后重试"]),
            ),
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, suggestions) = match &self {
            ApiError::Measurement(err) => classify(err),
            ApiError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                strings(&["请检查JSON格式是否正确", "确保Content-Type为application/json"]),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                strings(&["请检查请求URL是否正确"]),
            ),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "METHOD_NOT_ALLOWED",
                strings(&["请检查请求方法是否正确"]),
            ),
            ApiError::Disabled(_) => (
                StatusCode::NOT_FOUND,
                "SERVICE_DISABLED",
                strings(&["请确认服务运行模式"]),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                strings(&["系统遇到内部错误，请稍后重试"]),
            ),
        };

        let message = self.to_string();
        debug!("返回错误响应 {} [{}]: {}", status.as_u16(), error_type, message);

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "suggestions": suggestions,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use measurement_core::RegionError;

    fn status_of(err: MeasurementError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_measurement_error_status_mapping() {
        assert_eq!(
            status_of(MeasurementError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(MeasurementError::InvalidCron {
                expr: "x".into(),
                message: "bad".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(MeasurementError::InvalidState("done".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(MeasurementError::task_not_found("abc")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(MeasurementError::Conflict("dup".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(MeasurementError::dependency("scheduler.create_job", "boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(MeasurementError::PartialFailure {
                errors: vec![RegionError::new("us", "boom")]
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bad_request_and_fallbacks() {
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::MethodNotAllowed.into_response().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
