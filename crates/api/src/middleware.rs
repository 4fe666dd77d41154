use std::any::Any;
use std::time::Duration;

use axum::{
    extract::{Query, Request},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tower_http::{
    catch_panic::CatchPanicLayer,
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use measurement_worker::BenchmarkTag;

use crate::error::ApiError;

/// 压测时附带的查询参数
#[derive(Debug, Default, Deserialize)]
pub struct BenchmarkParams {
    pub benchmark_id: Option<String>,
    pub benchmark_sequence: Option<String>,
}

impl BenchmarkParams {
    /// 无法解析为整数的参数按0处理
    pub fn tag(&self) -> BenchmarkTag {
        let parse = |raw: &Option<String>| {
            raw.as_deref()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };
        BenchmarkTag {
            id: parse(&self.benchmark_id),
            sequence: parse(&self.benchmark_sequence),
        }
    }
}

pub async fn request_logging(
    Query(bench): Query<BenchmarkParams>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;
    let duration = start.elapsed();

    info!(
        benchmark_id = ?bench.benchmark_id,
        benchmark_sequence = ?bench.benchmark_sequence,
        latency_ms = duration.as_millis() as u64,
        "完成请求处理: {} {} - 状态: {}",
        method,
        path,
        response.status()
    );

    response
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(AnyOrigin);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        layer.allow_origin(AnyOrigin)
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

type HttpTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>>;

pub fn trace_layer() -> HttpTraceLayer {
    TraceLayer::new_for_http()
}

/// 超时返回 408 Request Timeout
pub fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// 将处理器中的panic转换为JSON 500响应，服务继续运行
pub fn catch_panic_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(handle_panic as PanicHandler)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "未知错误".to_string()
    };
    error!(critical = true, "请求处理过程中发生panic: {}", detail);

    ApiError::Internal("请求处理过程中发生未预期的错误".to_string()).into_response()
}
