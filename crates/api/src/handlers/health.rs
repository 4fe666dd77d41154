use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{error::ApiResult, routes::AppState, ApiError};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "mode": state.mode,
        "region": state.agent.as_ref().map(|agent| agent.region()),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "measurement",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus 文本格式的指标快照
pub async fn metrics_snapshot(State(state): State<AppState>) -> ApiResult<String> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ApiError::Disabled("指标"))
}
