use async_trait::async_trait;
use tracing::{debug, error};

use measurement_core::traits::{
    AgentInvoker, InvocationRequest, MeasurementInvocation, TRACE_CONTEXT_HEADER,
};
use measurement_core::{MeasurementError, Result};

/// 通过HTTP调用执行端 `POST /api/v1/measurements`
pub struct HttpAgentInvoker {
    http_client: reqwest::Client,
}

impl HttpAgentInvoker {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<()> {
        let mut builder = self
            .http_client
            .post(&request.url)
            .json(&MeasurementInvocation {
                id: request.task_id.clone(),
            });
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(trace) = &request.trace_context {
            builder = builder.header(TRACE_CONTEXT_HEADER, trace);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| MeasurementError::dependency("agent.invoke", e))?;

        let status = response.status();
        if status.is_success() {
            debug!(task_id = %request.task_id, "区域 {} 执行端调用成功", request.region);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(
                task_id = %request.task_id,
                "区域 {} 执行端返回 HTTP {} - {}", request.region, status, body
            );
            Err(MeasurementError::dependency(
                "agent.invoke",
                format!("HTTP {status} - {body}"),
            ))
        }
    }
}
