use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use measurement_dispatcher::TaskController;
use measurement_worker::MeasurementAgent;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::error::ApiError;
use crate::handlers::{
    health::{health_check, metrics_snapshot},
    measurements::run_measurement,
    not_found,
    tasks::{cancel_task, create_task, get_task_results, get_task_status},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub controller: Option<Arc<TaskController>>,
    pub agent: Option<MeasurementAgent>,
    pub project_id: String,
    /// 服务运行模式：api / agent / all
    pub mode: String,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(project_id: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            controller: None,
            agent: None,
            project_id: project_id.into(),
            mode: mode.into(),
            metrics: None,
        }
    }

    pub fn with_controller(mut self, controller: Arc<TaskController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_agent(mut self, agent: MeasurementAgent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn controller(&self) -> Result<&TaskController, ApiError> {
        self.controller
            .as_deref()
            .ok_or(ApiError::Disabled("任务管理"))
    }

    pub fn agent(&self) -> Result<&MeasurementAgent, ApiError> {
        self.agent.as_ref().ok_or(ApiError::Disabled("测量执行端"))
    }
}

/// 创建API路由，按状态中启用的组件注册端点
pub fn create_routes(state: AppState, metrics_path: &str) -> Router {
    let mut router = Router::new().route("/health", get(health_check));

    if state.controller.is_some() {
        router = router
            .route("/api/v1/tasks", post(create_task))
            .route("/api/v1/tasks/{id}", delete(cancel_task))
            .route("/api/v1/tasks/{id}/status", get(get_task_status))
            .route("/api/v1/tasks/{id}/results", get(get_task_results));
    }
    if state.agent.is_some() {
        router = router.route("/api/v1/measurements", post(run_measurement));
    }
    if state.metrics.is_some() {
        router = router.route(metrics_path, get(metrics_snapshot));
    }

    router
        .fallback(not_found)
        .method_not_allowed_fallback(crate::handlers::method_not_allowed)
        .with_state(state)
}
