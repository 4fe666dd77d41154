//! # Measurement API
//!
//! 测量任务编排系统的REST API模块，同时承载任务提交端与区域执行端的HTTP接口。
//!
//! ## 架构设计
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Measurement API                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Routes  │  Handlers  │  Middleware  │  Response  │  Error   │
//! │ (路由定义) │  (处理器)   │  (中间件)     │ (响应格式)  │ (错误处理) │
//! └──────────────────────────────────────────────────────────────┘
//!                ↓                                ↓
//!       ┌──────────────────┐             ┌──────────────────┐
//!       │  TaskController  │             │ MeasurementAgent │
//!       │   (任务生命周期)    │             │    (区域执行端)     │
//!       └──────────────────┘             └──────────────────┘
//! ```
//!
//! ## API 端点
//!
//! ### 任务管理（`api` 模式）
//! - `POST /api/v1/tasks` - 创建任务并分发到各区域
//! - `GET /api/v1/tasks/{id}/status` - 查询任务状态
//! - `GET /api/v1/tasks/{id}/results` - 查询任务结果
//! - `DELETE /api/v1/tasks/{id}` - 取消任务
//!
//! ### 执行端（`agent` 模式）
//! - `POST /api/v1/measurements` - 执行一次测量
//!
//! ### 运维
//! - `GET /health` - 健康检查
//! - `GET /metrics` - Prometheus 指标（需开启）
//!
//! 所有错误响应统一为 `{"error": {"message", "type", "code", "suggestions", "timestamp"}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod trace;

use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;

use measurement_core::config::{ApiConfig, ObservabilityConfig};
use middleware::{catch_panic_layer, cors_layer, request_logging, timeout_layer, trace_layer};

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_routes, AppState};
pub use trace::TraceContext;

/// 创建完整的API应用
pub fn create_app(
    state: AppState,
    api_config: &ApiConfig,
    observability: &ObservabilityConfig,
) -> Router {
    let router = create_routes(state, &observability.metrics_endpoint);

    let router = router.layer(
        ServiceBuilder::new()
            .layer(catch_panic_layer())
            .layer(trace_layer())
            .layer(timeout_layer(Duration::from_secs(
                api_config.request_timeout_seconds,
            )))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer(&api_config.cors_origins))
    } else {
        router
    }
}
